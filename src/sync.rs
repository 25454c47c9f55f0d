/*!
    byte alignment handshake

    the bus carries no framing, so both sides agree on frame boundaries by exchanging [START_SEQUENCE]: the master sends it and the slave echoes every byte of it. The slave considers the link aligned once it received the full sequence, the master once it read back the echoes.
*/

use crate::command::{RX_OFFSET, SENTINEL};


/// probe sequence, only its byte by byte content matters
pub const START_SEQUENCE: [u8; 9] = [8, 7, 6, 5, 4, 3, 2, 1, SENTINEL];
const _: () = assert!(START_SEQUENCE.len() > RX_OFFSET);

/// alignment state of a link
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Unsynchronized,
    Synchronized,
}
impl SyncState {
    pub fn is_synchronized(self) -> bool {
        self == Self::Synchronized
    }
}


/// slave side of the handshake, fed one received byte at a time
#[derive(Clone, Debug, Default)]
pub struct SyncResponder {
    position: usize,
}
/// outcome of one received byte
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResponderStep {
    /// byte to answer on next clock
    pub reply: u8,
    /// the full sequence has just been received
    pub synchronized: bool,
}
impl SyncResponder {
    pub const fn new() -> Self {
        Self {position: 0}
    }
    /// index of the next expected byte in [START_SEQUENCE]
    pub fn position(&self) -> usize {self.position}
    /// restart matching from the first byte of the sequence
    pub fn reset(&mut self) {self.position = 0}

    pub fn step(&mut self, received: u8) -> ResponderStep {
        if received != START_SEQUENCE[self.position] {
            // this byte is dropped, matching restarts from the next one
            self.position = 0;
            return ResponderStep {reply: 0, synchronized: false};
        }
        if self.position == START_SEQUENCE.len()-1 {
            self.position = 0;
            ResponderStep {reply: 0, synchronized: true}
        }
        else {
            let reply = START_SEQUENCE[self.position];
            self.position += 1;
            ResponderStep {reply, synchronized: false}
        }
    }
}


/// master side of the handshake: buffer to transmit
pub const fn probe() -> [u8; START_SEQUENCE.len()] {
    START_SEQUENCE
}
/**
    master side of the handshake: check the bytes received while transmitting [probe]

    every meaningful byte of the sequence must have been echoed, one byte later. The last byte of the sequence is never echoed within the transaction, it only gives the slave the clock needed to send the echo of the byte before.
*/
pub fn verify(received: &[u8]) -> bool {
    let meaningful = START_SEQUENCE.len() - RX_OFFSET;
    received.len() >= START_SEQUENCE.len()
    && received[RX_OFFSET ..][.. meaningful] == START_SEQUENCE[.. meaningful]
}
