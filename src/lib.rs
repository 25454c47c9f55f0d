#![no_std]
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod command;
pub mod commands;
pub mod sync;
pub mod watchdog;

#[cfg(feature = "master")]
pub mod master;
#[cfg(feature = "slave")]
pub mod slave;
