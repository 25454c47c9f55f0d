//! simulated bus devices for testing slots against a real slave interpreter

use core::convert::Infallible;
use std::{
    cell::RefCell,
    rc::Rc,
    vec::Vec,
    time::Duration,
    };
use embedded_hal::{
    spi::{self, SpiDevice, Operation},
    digital::{self, OutputPin},
    delay::DelayNs,
    };

use crate::slave::{Responder, PullSource, Inbox};


/// spi device wired to a slave responder, each byte received by the master is the slave's answer to the previous byte
pub struct Loopback<'a, P, const N: usize> {
    responder: Responder<'a, P, N>,
    /// answer loaded by the slave for next clock
    pending: u8,
    /// index in transaction and mask of a byte to garble on its way to the slave
    corruption: Option<(usize, u8)>,
}
impl<'a, P: PullSource, const N: usize> Loopback<'a, P, N> {
    pub fn new(pulls: P, inbox: &'a Inbox<N>) -> Self {
        Self {
            responder: Responder::new(pulls, inbox),
            pending: 0,
            corruption: None,
        }
    }
    /// garble a byte sent in next transaction
    pub fn corrupt(&mut self, index: usize, mask: u8) {
        self.corruption = Some((index, mask));
    }
    fn clock(&mut self, index: usize, mut sent: u8) -> u8 {
        if let Some((corrupted, mask)) = self.corruption {
            if corrupted == index {
                sent ^= mask;
                self.corruption = None;
            }
        }
        let answer = self.pending;
        self.pending = self.responder.on_byte(sent);
        answer
    }
}
impl<P, const N: usize> spi::ErrorType for Loopback<'_, P, N> {
    type Error = Infallible;
}
impl<P: PullSource, const N: usize> SpiDevice for Loopback<'_, P, N> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut index = 0;
        for operation in operations {
            match operation {
                Operation::Read(read) => for byte in read.iter_mut() {
                    *byte = self.clock(index, 0);
                    index += 1;
                },
                Operation::Write(write) => for &byte in write.iter() {
                    self.clock(index, byte);
                    index += 1;
                },
                Operation::Transfer(read, write) => for i in 0 .. read.len().max(write.len()) {
                    let answer = self.clock(index, write.get(i).copied().unwrap_or(0));
                    if let Some(byte) = read.get_mut(i) {
                        *byte = answer;
                    }
                    index += 1;
                },
                Operation::TransferInPlace(buffer) => for byte in buffer.iter_mut() {
                    *byte = self.clock(index, *byte);
                    index += 1;
                },
                Operation::DelayNs(_) => {},
            }
        }
        Ok(())
    }
}

/// spi device with no slave answering
pub struct Dead;
impl spi::ErrorType for Dead {
    type Error = Infallible;
}
impl SpiDevice for Dead {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        for operation in operations {
            match operation {
                Operation::Read(read) | Operation::TransferInPlace(read) => read.fill(0),
                Operation::Transfer(read, _) => read.fill(0),
                Operation::Write(_) | Operation::DelayNs(_) => {},
            }
        }
        Ok(())
    }
}

/// restart line recording the levels it is set to
#[derive(Clone, Default)]
pub struct Line(Rc<RefCell<Vec<bool>>>);
impl Line {
    pub fn levels(&self) -> Vec<bool> {
        self.0.borrow().clone()
    }
}
impl digital::ErrorType for Line {
    type Error = Infallible;
}
impl OutputPin for Line {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(false);
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(true);
        Ok(())
    }
}

/// delay returning immediately
pub struct NoDelay;
impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// delay recording the time it was asked to wait
#[derive(Clone, Default)]
pub struct Delays(Rc<RefCell<Vec<u32>>>);
impl Delays {
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.0.borrow().iter().map(|&ns| u64::from(ns)).sum())
    }
}
impl DelayNs for Delays {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().push(ns);
    }
}
