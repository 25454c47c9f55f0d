/*!
    slave side of the link

    the slave answers the master byte per byte, from the bus interrupt: the answer to a byte must be ready before the master clocks the next one. Hence frames are never buffered before answering, [Interpreter] processes them incrementally with fixed size state.

    The interrupt handler owns a [Responder], the main loop only shares an [Inbox] with it, where completed push commands are queued.
*/

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, AtomicU32, Ordering::*},
    };
use critical_section::Mutex;
use heapless::{Deque, Vec};
use log::*;

use crate::{
    command::{CommandId, RawValue, Value, ValueType, ACK_REQUEST, ID, VALUE, ACK},
    sync::{SyncResponder, SyncState},
    };


/// bytes the master sends in place of the ack id
const ACK_BYTES: [u8; 2] = ACK_REQUEST.to_le_bytes();


/// provider of the values requested by pull commands
pub trait PullSource {
    /// value to answer for the given command, `None` if the command is not pulled from this slave
    fn pull(&mut self, id: CommandId) -> Option<RawValue>;
}
/// consumer of the values received with push commands
pub trait PushSink {
    fn push(&mut self, id: CommandId, value: RawValue);
}


/// event produced by a received byte
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Event {
    /// the handshake completed, next byte starts a frame
    Synchronized,
    /// an unexpected byte was received, waiting for a new handshake
    Desynchronized,
    /// a push command frame was fully received
    Push {id: CommandId, value: RawValue},
    /// a pull command frame was fully answered
    Pull {id: CommandId},
}
/// outcome of a received byte
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Step {
    /// byte to send while the master clocks the next byte
    pub reply: u8,
    pub event: Option<Event>,
}
impl Step {
    fn reply(reply: u8) -> Self {
        Self {reply, event: None}
    }
}

/**
    incremental frame processor

    every call to [Self::step] costs a bounded amount of work, and does no logging nor allocation, so it can run in interrupt context
*/
#[derive(Clone, Debug, Default)]
pub struct Interpreter {
    sync: SyncResponder,
    state: SyncState,
    /// position of next byte in current frame
    position: usize,
    id: [u8; 2],
    value: RawValue,
    /// current frame is a pull command, `value` holds the answer
    pull: bool,
}
impl Interpreter {
    pub const fn new() -> Self {
        Self {
            sync: SyncResponder::new(),
            state: SyncState::Unsynchronized,
            position: 0,
            id: [0; 2],
            value: [0; 4],
            pull: false,
        }
    }
    pub fn state(&self) -> SyncState {self.state}
    /// position of next byte in the current frame
    pub fn position(&self) -> usize {self.position}

    /// process a received byte, returning the byte to answer on next clock
    pub fn step(&mut self, received: u8, pulls: &mut impl PullSource) -> Step {
        if ! self.state.is_synchronized() {
            let step = self.sync.step(received);
            if step.synchronized {
                self.state = SyncState::Synchronized;
                self.position = 0;
                return Step {reply: step.reply, event: Some(Event::Synchronized)};
            }
            return Step::reply(step.reply);
        }

        let position = self.position;
        self.position += 1;
        // id is always echoed
        if ID.contains(&position) {
            self.id[position - ID.start] = received;
            Step::reply(received)
        }
        // value is echoed for push commands, replaced for pull commands
        else if VALUE.contains(&position) {
            if position == VALUE.start {
                match pulls.pull(self.id()) {
                    Some(value) => {
                        self.value = value;
                        self.pull = true;
                    },
                    None => self.pull = false,
                }
            }
            let index = position - VALUE.start;
            if self.pull {
                Step::reply(self.value[index])
            }
            else {
                self.value[index] = received;
                Step::reply(received)
            }
        }
        // ack request is answered with the id
        else if ACK.contains(&position) {
            let index = position - ACK.start;
            if received != ACK_BYTES[index] {
                self.desynchronize();
                return Step {reply: 0, event: Some(Event::Desynchronized)};
            }
            Step::reply(self.id[index])
        }
        // sentinel ends the frame
        else {
            self.position = 0;
            let id = self.id();
            let event = if self.pull  {Event::Pull {id}}
                        else  {Event::Push {id, value: self.value}};
            self.pull = false;
            Step {reply: 0, event: Some(event)}
        }
    }

    fn id(&self) -> CommandId {
        CommandId::from_le_bytes(self.id)
    }
    fn desynchronize(&mut self) {
        self.state = SyncState::Unsynchronized;
        self.position = 0;
        self.pull = false;
        self.sync.reset();
    }
}


/// counters of the slave link, maintained by the interrupt
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InboxStats {
    /// frames completed since startup, push and pull
    pub completed: u32,
    /// synchronization losses since startup
    pub desyncs: u32,
    /// push frames lost because the main loop did not dispatch them in time
    pub dropped: u32,
}

/**
    state shared between the bus interrupt and the main loop

    counters are written only by the interrupt. Push frames are queued by the interrupt and dispatched by the main loop, both only holding the critical section for a copy.
*/
pub struct Inbox<const N: usize> {
    frames: Mutex<RefCell<Deque<(CommandId, RawValue), N>>>,
    synchronized: AtomicBool,
    completed: AtomicU32,
    desyncs: AtomicU32,
    dropped: AtomicU32,
}
impl<const N: usize> Inbox<N> {
    pub const fn new() -> Self {
        Self {
            frames: Mutex::new(RefCell::new(Deque::new())),
            synchronized: AtomicBool::new(false),
            completed: AtomicU32::new(0),
            desyncs: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }
    pub fn state(&self) -> SyncState {
        if self.synchronized.load(Acquire)  {SyncState::Synchronized}
        else  {SyncState::Unsynchronized}
    }
    pub fn stats(&self) -> InboxStats {
        InboxStats {
            completed: self.completed.load(Relaxed),
            desyncs: self.desyncs.load(Relaxed),
            dropped: self.dropped.load(Relaxed),
        }
    }
    /// oldest push frame not yet dispatched
    pub fn take(&self) -> Option<(CommandId, RawValue)> {
        critical_section::with(|cs| self.frames.borrow_ref_mut(cs).pop_front())
    }
    /// deliver all queued push frames to the given sink, returns the number of frames delivered
    pub fn dispatch(&self, sink: &mut impl PushSink) -> usize {
        let mut count = 0;
        while let Some((id, value)) = self.take() {
            sink.push(id, value);
            count += 1;
        }
        count
    }

    fn post(&self, id: CommandId, value: RawValue) {
        let full = critical_section::with(|cs|
            self.frames.borrow_ref_mut(cs).push_back((id, value)).is_err()
            );
        if full {
            bump(&self.dropped);
        }
    }
}
impl<const N: usize> Default for Inbox<N> {
    fn default() -> Self {Self::new()}
}

/// increment a counter that has a single writer
fn bump(counter: &AtomicU32) {
    counter.store(counter.load(Relaxed).wrapping_add(1), Relaxed);
}


/**
    context owned by the bus interrupt handler

    its [Self::on_byte] method is meant to be the whole interrupt body: it takes the byte received and returns the byte to load for the next transfer.
*/
pub struct Responder<'a, P, const N: usize> {
    interpreter: Interpreter,
    pulls: P,
    inbox: &'a Inbox<N>,
}
impl<'a, P: PullSource, const N: usize> Responder<'a, P, N> {
    pub fn new(pulls: P, inbox: &'a Inbox<N>) -> Self {
        Self {
            interpreter: Interpreter::new(),
            pulls,
            inbox,
        }
    }
    pub fn interpreter(&self) -> &Interpreter {&self.interpreter}

    pub fn on_byte(&mut self, received: u8) -> u8 {
        let step = self.interpreter.step(received, &mut self.pulls);
        match step.event {
            Some(Event::Synchronized) => self.inbox.synchronized.store(true, Release),
            Some(Event::Desynchronized) => {
                self.inbox.synchronized.store(false, Release);
                bump(&self.inbox.desyncs);
            },
            Some(Event::Push {id, value}) => {
                bump(&self.inbox.completed);
                self.inbox.post(id, value);
            },
            Some(Event::Pull {..}) => bump(&self.inbox.completed),
            None => {},
        }
        step.reply
    }
}


/// fixed size table of pull commands, each read by a function
pub struct PullTable<const N: usize> {
    entries: Vec<(CommandId, fn() -> Value), N>,
}
impl<const N: usize> PullTable<N> {
    pub const fn new() -> Self {
        Self {entries: Vec::new()}
    }
    /// declare a pull command and the function returning its current value
    pub fn register(&mut self, id: CommandId, read: fn() -> Value) -> Result<(), &'static str> {
        if self.entries.iter().any(|&(known, _)| known == id) {
            return Err("command already registered");
        }
        self.entries.push((id, read)).map_err(|_| "too many items for table")
    }
}
impl<const N: usize> PullSource for PullTable<N> {
    fn pull(&mut self, id: CommandId) -> Option<RawValue> {
        self.entries.iter()
            .find(|&&(known, _)| known == id)
            .map(|&(_, read)| read().to_raw())
    }
}
impl<const N: usize> Default for PullTable<N> {
    fn default() -> Self {Self::new()}
}

/// fixed size table of push commands, each applied by a function
pub struct PushTable<const N: usize> {
    entries: Vec<(CommandId, ValueType, fn(Value)), N>,
}
impl<const N: usize> PushTable<N> {
    pub const fn new() -> Self {
        Self {entries: Vec::new()}
    }
    /// declare a push command, its value type and the function applying it
    pub fn register(&mut self, id: CommandId, ty: ValueType, apply: fn(Value)) -> Result<(), &'static str> {
        if self.entries.iter().any(|&(known, _, _)| known == id) {
            return Err("command already registered");
        }
        self.entries.push((id, ty, apply)).map_err(|_| "too many items for table")
    }
}
impl<const N: usize> PushSink for PushTable<N> {
    fn push(&mut self, id: CommandId, value: RawValue) {
        match self.entries.iter().find(|&&(known, _, _)| known == id) {
            Some(&(_, ty, apply)) => apply(Value::from_raw(ty, &value)),
            None => debug!("ignored push command {}", id),
        }
    }
}
impl<const N: usize> Default for PushTable<N> {
    fn default() -> Self {Self::new()}
}



#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicI32;
    use std::vec::Vec;
    use crate::{
        command::{encode, FRAME_SIZE},
        commands::{STEERING, MOTOR_SPEED, DISTANCE_FRONT},
        sync::probe,
        };

    /// full duplex exchange: each received byte is the answer to the previous sent byte
    fn exchange<P: PullSource, const N: usize>(responder: &mut Responder<'_, P, N>, pending: &mut u8, send: &[u8]) -> Vec<u8> {
        send.iter().map(|&byte| {
            let answer = *pending;
            *pending = responder.on_byte(byte);
            answer
        }).collect()
    }

    fn distance() -> Value {Value::Float(37.5)}

    #[derive(Default)]
    struct Collect(Vec<(CommandId, RawValue)>);
    impl PushSink for Collect {
        fn push(&mut self, id: CommandId, value: RawValue) {
            self.0.push((id, value));
        }
    }

    #[test]
    fn push_is_echoed() {
        let inbox = Inbox::<4>::new();
        let mut responder = Responder::new(PullTable::<2>::new(), &inbox);
        let mut pending = 0;
        exchange(&mut responder, &mut pending, &probe());
        assert_eq!(inbox.state(), SyncState::Synchronized);

        let mut send = [0u8; FRAME_SIZE];
        STEERING.encode(-120, &mut send, 0);
        let received = exchange(&mut responder, &mut pending, &send);
        // id and value echoed, ack answered with id
        assert_eq!(received[1 .. 7], send[0 .. 6]);
        assert_eq!(received[7 .. 9], send[0 .. 2]);
        assert_eq!(responder.interpreter().position(), 0);

        let mut sink = Collect::default();
        assert_eq!(inbox.dispatch(&mut sink), 1);
        assert_eq!(sink.0, [(STEERING.id(), Value::Int16(-120).to_raw())]);
        assert_eq!(inbox.stats().completed, 1);
    }

    #[test]
    fn pull_is_answered() {
        let inbox = Inbox::<4>::new();
        let mut pulls = PullTable::<2>::new();
        pulls.register(DISTANCE_FRONT.id(), distance).unwrap();
        let mut responder = Responder::new(pulls, &inbox);
        let mut pending = 0;
        exchange(&mut responder, &mut pending, &probe());

        let mut send = [0u8; FRAME_SIZE];
        DISTANCE_FRONT.encode(0., &mut send, 0);
        let received = exchange(&mut responder, &mut pending, &send);
        assert_eq!(received[1 .. 3], send[0 .. 2]);
        assert_eq!(received[3 .. 7], 37.5f32.to_le_bytes());
        assert_eq!(received[7 .. 9], send[0 .. 2]);

        // pull frames are not queued for the main loop
        assert_eq!(inbox.take(), None);
        assert_eq!(inbox.stats().completed, 1);
    }

    #[test]
    fn corrupted_ack_desynchronizes() {
        let inbox = Inbox::<4>::new();
        let mut responder = Responder::new(PullTable::<0>::new(), &inbox);
        let mut pending = 0;
        exchange(&mut responder, &mut pending, &probe());

        let mut send = [0u8; FRAME_SIZE];
        MOTOR_SPEED.encode(300, &mut send, 0);
        send[ACK.start] = 0x12;
        let received = exchange(&mut responder, &mut pending, &send[.. ACK.end]);
        assert_eq!(received[ACK.end - 1], 0);
        assert_eq!(responder.interpreter().state(), SyncState::Unsynchronized);
        assert_eq!(inbox.state(), SyncState::Unsynchronized);
        assert_eq!(inbox.stats().desyncs, 1);

        // further frames are ignored until a new handshake
        exchange(&mut responder, &mut pending, &send);
        assert_eq!(inbox.take(), None);
        exchange(&mut responder, &mut pending, &probe());
        assert_eq!(inbox.state(), SyncState::Synchronized);
    }

    #[test]
    fn frames_ignored_before_handshake() {
        let inbox = Inbox::<4>::new();
        let mut responder = Responder::new(PullTable::<0>::new(), &inbox);
        let mut pending = 0;
        let mut send = [0u8; 2*FRAME_SIZE];
        encode(1, 10i16, &mut send, 0);
        encode(2, 20i16, &mut send, FRAME_SIZE);
        exchange(&mut responder, &mut pending, &send);
        assert_eq!(inbox.stats(), InboxStats::default());
        assert_eq!(inbox.take(), None);
    }

    #[test]
    fn full_inbox_drops() {
        let inbox = Inbox::<2>::new();
        let mut responder = Responder::new(PullTable::<0>::new(), &inbox);
        let mut pending = 0;
        exchange(&mut responder, &mut pending, &probe());

        let mut send = [0u8; 8*FRAME_SIZE];
        for i in 0 .. 8 {
            encode(1, i as i16, &mut send, i*FRAME_SIZE);
        }
        exchange(&mut responder, &mut pending, &send);
        let stats = inbox.stats();
        assert_eq!(stats.completed, 8);
        assert!(stats.dropped > 0);
        // oldest frames are kept
        assert_eq!(inbox.take(), Some((1, Value::Int16(0).to_raw())));
    }

    static STEERING_APPLIED: AtomicI32 = AtomicI32::new(0);
    fn apply_steering(value: Value) {
        if let Value::Int16(value) = value {
            STEERING_APPLIED.store(value.into(), Relaxed);
        }
    }

    #[test]
    fn push_table() {
        let mut table = PushTable::<2>::new();
        table.register(STEERING.id(), ValueType::Int16, apply_steering).unwrap();
        assert!(table.register(STEERING.id(), ValueType::Int16, apply_steering).is_err());

        table.push(STEERING.id(), Value::Int16(-42).to_raw());
        assert_eq!(STEERING_APPLIED.load(Relaxed), -42);
        // unknown commands are ignored
        table.push(9, Value::Int16(5).to_raw());
        assert_eq!(STEERING_APPLIED.load(Relaxed), -42);
    }

    #[test]
    fn pull_table_capacity() {
        let mut table = PullTable::<1>::new();
        table.register(5, distance).unwrap();
        assert!(table.register(6, distance).is_err());
        assert_eq!(table.pull(5), Some(37.5f32.to_le_bytes()));
        assert_eq!(table.pull(6), None);
    }
}
