/*!
    implement the master side of the link in `std` environment.

    The master owns the bus clock: every transaction it sends all the frames of a slave and receives their answers in the same transfer. Slaves answer each byte one byte later, so frames are validated with this offset.

    - [Validator] checks a transaction's answers and delivers pulled values
    - [Slot] is one slave on the bus: its buffers, handshake, restart line and link state
    - [Scheduler] gives each slot its turn on the bus at its own period
*/

/// checks of received frames, this is the tricky part of the code
mod validator;
/// per slave link state and transactions
mod slot;
/// round robin over slots
mod scheduler;
#[cfg(all(test, feature = "slave"))]
mod testing;


pub use validator::*;
pub use slot::*;
pub use scheduler::*;


use thiserror::Error;

/// error regarding the link with a slave
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("problem with spi bus: {0:?}")]
    Bus(embedded_hal::spi::ErrorKind),
    #[error("problem with restart line: {0:?}")]
    Restart(embedded_hal::digital::ErrorKind),
    #[error("transaction rejected: {0}")]
    Frame(#[from] FrameError),
    #[error("no free slot in scheduler")]
    Full,
}
