use std::{
    collections::HashMap,
    sync::Arc,
    vec::Vec,
    };
use thiserror::Error;
use log::*;

use crate::{
    command::{self, CommandId, CommandValue, Value, ValueType, FRAME_SIZE, RX_OFFSET, ID, VALUE, ACK, ACK_REQUEST, MAX_ID},
    commands::Command,
    };


/// receiver of values pulled from slaves
pub trait PullHandler {
    fn on_pull(&self, id: CommandId, value: Value);
}
impl<F: Fn(CommandId, Value)> PullHandler for F {
    fn on_pull(&self, id: CommandId, value: Value) {
        self(id, value)
    }
}

/// reason for rejecting a frame in a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame {frame}: id echoed as {echoed} but acknowledged as {acknowledged}")]
    IdMismatch {frame: usize, echoed: CommandId, acknowledged: CommandId},
    #[error("frame {frame}: id {id} is out of range")]
    IdOutOfRange {frame: usize, id: CommandId},
    #[error("frame {frame}: value of push command {id} was not echoed")]
    StaleEcho {frame: usize, id: CommandId},
}

/// frame accepted in a transaction
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Accepted {
    /// the slave received this command value
    Push {id: CommandId},
    /// the slave sent this value
    Pull {id: CommandId, value: Value},
}

struct PullEntry {
    ty: ValueType,
    handler: Arc<dyn PullHandler>,
}

/**
    checks the frames received during a transaction against the frames sent

    the answer to each sent byte is received one byte later, so a frame sent at `offset` is answered at `offset + RX_OFFSET`. For each frame:

    - the id must be echoed, and acknowledged in place of the ack request
    - the id must be a valid command id
    - a pull command gets its value from the slave, a push command must have its value echoed
*/
pub struct Validator {
    max_id: CommandId,
    pulls: HashMap<CommandId, PullEntry>,
}
impl Validator {
    pub fn new() -> Self {
        Self {
            max_id: MAX_ID,
            pulls: HashMap::new(),
        }
    }
    pub fn with_max_id(mut self, max_id: CommandId) -> Self {
        self.max_id = max_id;
        self
    }
    /// declare a pull command, replacing any handler previously registered for it
    pub fn register(&mut self, id: CommandId, ty: ValueType, handler: Arc<dyn PullHandler>) {
        if self.pulls.insert(id, PullEntry {ty, handler}).is_some() {
            debug!("replaced pull handler for command {}", id);
        }
    }
    pub fn register_pull<T: CommandValue>(&mut self, command: Command<T>, handler: Arc<dyn PullHandler>) {
        self.register(command.id(), T::TYPE, handler)
    }
    pub fn is_pull(&self, id: CommandId) -> bool {
        self.pulls.contains_key(&id)
    }

    /**
        validate a whole transaction.

        If any frame is invalid, the transaction is rejected and no pulled value is delivered. Otherwise each pulled value is delivered once to its handler.
    */
    pub fn validate(&self, sent: &[u8], received: &[u8]) -> Result<Vec<Accepted>, FrameError> {
        assert_eq!(sent.len(), received.len(), "full duplex transfers send and receive the same amount");
        assert!(sent.len() % FRAME_SIZE == 0, "transaction is not made of whole frames");

        let accepted = sent.chunks_exact(FRAME_SIZE).enumerate()
            .map(|(frame, sent)| self.check(frame, sent, &received[frame*FRAME_SIZE + RX_OFFSET ..]))
            .collect::<Result<Vec<_>, _>>()?;

        for &item in &accepted {
            if let Accepted::Pull {id, value} = item {
                self.pulls[&id].handler.on_pull(id, value);
            }
        }
        Ok(accepted)
    }

    /// check one frame, `received` starts with the answer to the first byte of `sent`
    fn check(&self, frame: usize, sent: &[u8], received: &[u8]) -> Result<Accepted, FrameError> {
        let id = command::decode_id(sent);
        let request = command::decode_id(&sent[ACK]);
        if request != ACK_REQUEST {
            warn!("frame {}: ack request sent as {}", frame, request);
        }
        let echoed = command::decode_id(&received[ID]);
        let acknowledged = command::decode_id(&received[ACK]);

        let id1 = if echoed == id  {id} else {ACK_REQUEST};
        let id2 = if acknowledged == id  {id} else {ACK_REQUEST};
        if id1 != id2 {
            return Err(FrameError::IdMismatch {frame, echoed, acknowledged});
        }
        if ! (1 ..= self.max_id).contains(&id1) {
            return Err(FrameError::IdOutOfRange {frame, id: id1});
        }

        if let Some(pull) = self.pulls.get(&id1) {
            Ok(Accepted::Pull {id: id1, value: Value::from_raw(pull.ty, &received[VALUE])})
        }
        else if received[VALUE] == sent[VALUE] {
            Ok(Accepted::Push {id: id1})
        }
        else {
            Err(FrameError::StaleEcho {frame, id: id1})
        }
    }
}
impl Default for Validator {
    fn default() -> Self {Self::new()}
}
