use std::{
    boxed::Box,
    string::String,
    sync::Arc,
    time::Duration,
    vec::Vec,
    vec,
    };
use embedded_hal::{
    spi::{SpiDevice, Error as _},
    digital::{OutputPin, Error as _},
    delay::DelayNs,
    };
use log::*;

use crate::{
    command::{self, CommandId, CommandValue, Value, ValueType, FRAME_SIZE},
    commands::Command,
    sync::{self, SyncState, START_SEQUENCE},
    };
use super::{
    Error,
    validator::{Validator, Accepted, PullHandler},
    };


/// when to hard reset a slave whose transactions fail
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// never reset, only resynchronize
    Never,
    /// reset on every rejected transaction
    EveryFailure,
    /// reset once this number of consecutive ticks failed, unanswered handshakes included
    AfterConsecutive(u32),
}
impl Default for RestartPolicy {
    fn default() -> Self {Self::AfterConsecutive(3)}
}

/// settings of a slot
#[derive(Clone, Debug)]
pub struct SlotConfig {
    /// name of the slave in logs
    pub name: String,
    /// chip select line of the slave, for logs
    pub chip_select: u8,
    /// time between transactions
    pub period: Duration,
    /// time the restart line is held low to reset the slave
    pub restart_pulse: Duration,
    pub restart_policy: RestartPolicy,
    /// highest command id the slave is expected to answer
    pub max_id: CommandId,
}
impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            name: String::from("slave"),
            chip_select: 0,
            period: Duration::from_millis(20),
            restart_pulse: Duration::from_millis(10),
            restart_policy: RestartPolicy::default(),
            max_id: command::MAX_ID,
        }
    }
}
impl SlotConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    pub fn with_chip_select(mut self, chip_select: u8) -> Self {
        self.chip_select = chip_select;
        self
    }
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
    pub fn with_restart_pulse(mut self, pulse: Duration) -> Self {
        self.restart_pulse = pulse;
        self
    }
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }
    pub fn with_max_id(mut self, max_id: CommandId) -> Self {
        self.max_id = max_id;
        self
    }
}

/// counters of a slot since startup
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// accepted transactions
    pub transactions: u32,
    /// rejected transactions and bus errors
    pub failures: u32,
    /// successful handshakes
    pub resyncs: u32,
    /// hard resets of the slave
    pub restarts: u32,
}

/// outcome of a slot tick
#[derive(Clone, Debug, PartialEq)]
pub enum Tick {
    /// the handshake succeeded, commands will be exchanged on next tick
    Synchronized,
    /// the handshake was not answered
    Unsynchronized,
    /// commands were exchanged and accepted
    Exchanged(Vec<Accepted>),
}


/// push frames of a slot, to be filled before each transaction
pub struct PushFrames<'b> {
    buffer: &'b mut [u8],
    layout: &'b [(CommandId, ValueType)],
}
impl PushFrames<'_> {
    /**
        set the value of a push command for the coming transaction, values not set keep their previous value

        panics if the command is not pushed by this slot or declared with another type
    */
    pub fn set<T: CommandValue>(&mut self, command: Command<T>, value: T) {
        self.set_value(command.id(), value.into())
    }
    pub fn set_value(&mut self, id: CommandId, value: Value) {
        let index = self.layout.iter()
            .position(|&(pushed, _)| pushed == id)
            .unwrap_or_else(|| panic!("command {} is not pushed by this slot", id));
        assert_eq!(self.layout[index].1, value.value_type(), "command {} declared with another value type", id);
        command::encode_raw(id, value.to_raw(), self.buffer, index * FRAME_SIZE);
    }
    /// current value of a push command
    pub fn get(&self, id: CommandId) -> Option<Value> {
        let index = self.layout.iter().position(|&(pushed, _)| pushed == id)?;
        Some(Value::from_raw(self.layout[index].1, &self.buffer[index * FRAME_SIZE ..][command::VALUE]))
    }
}

/// application object providing up to date push values before each transaction
pub trait PushSupplier {
    fn fill(&mut self, frames: &mut PushFrames<'_>);
}
impl<F: FnMut(&mut PushFrames<'_>)> PushSupplier for F {
    fn fill(&mut self, frames: &mut PushFrames<'_>) {
        self(frames)
    }
}


/**
    a slave on the bus: its commands, buffers and link state

    each tick performs one transaction: a handshake while unsynchronized, else the exchange of all declared commands. Push commands come first in the transaction, in declaration order, then pull commands.

    the restart line is active low and must be high when the slot is created.

    a restart holds the line low through `delay` within the tick, so [DelayNs] blocks the caller for the whole pulse. Under [Scheduler::run](super::Scheduler::run) every other slot and task of the same thread waits that long, hence `restart_pulse` should stay well below the shortest slot period.
*/
pub struct Slot<S, R, D> {
    config: SlotConfig,
    bus: S,
    restart_line: R,
    delay: D,
    supplier: Box<dyn PushSupplier>,
    /// declared push commands, in transaction order
    push: Vec<(CommandId, ValueType)>,
    transmit: Vec<u8>,
    receive: Vec<u8>,
    validator: Validator,
    state: SyncState,
    /// consecutive failed ticks
    failures: u32,
    stats: LinkStats,
}
impl<S: SpiDevice, R: OutputPin, D: DelayNs> Slot<S, R, D> {
    pub fn new(config: SlotConfig, bus: S, restart_line: R, delay: D, supplier: impl PushSupplier + 'static) -> Self {
        let validator = Validator::new().with_max_id(config.max_id);
        Self {
            config,
            bus,
            restart_line,
            delay,
            supplier: Box::new(supplier),
            push: Vec::new(),
            transmit: Vec::new(),
            receive: vec![0; START_SEQUENCE.len()],
            validator,
            state: SyncState::Unsynchronized,
            failures: 0,
            stats: LinkStats::default(),
        }
    }
    /// declare a push command, its value is zero until set by the supplier
    pub fn push<T: CommandValue>(mut self, command: Command<T>) -> Self {
        self.declare(command.id());
        let offset = self.push.len() * FRAME_SIZE;
        let mut frame = [0; FRAME_SIZE];
        command::encode_raw(command.id(), Default::default(), &mut frame, 0);
        self.transmit.splice(offset .. offset, frame);
        self.push.push((command.id(), T::TYPE));
        self.resize();
        self
    }
    /// declare a pull command and the handler receiving its values
    pub fn pull<T: CommandValue>(mut self, command: Command<T>, handler: Arc<dyn PullHandler>) -> Self {
        self.declare(command.id());
        let offset = self.transmit.len();
        self.transmit.resize(offset + FRAME_SIZE, 0);
        command::encode_raw(command.id(), Default::default(), &mut self.transmit, offset);
        self.validator.register_pull(command, handler);
        self.resize();
        self
    }
    fn declare(&self, id: CommandId) {
        assert!(! self.push.iter().any(|&(pushed, _)| pushed == id) && ! self.validator.is_pull(id),
            "command {} declared twice on slot {}", id, self.config.name);
    }
    fn resize(&mut self) {
        let size = self.transmit.len().max(START_SEQUENCE.len());
        self.receive.resize(size, 0);
    }

    pub fn config(&self) -> &SlotConfig {&self.config}
    pub fn state(&self) -> SyncState {self.state}
    pub fn stats(&self) -> LinkStats {self.stats}
    /// number of frames in a command transaction
    pub fn frames(&self) -> usize {self.transmit.len() / FRAME_SIZE}
    /// current value of a push command
    pub fn pushed(&self, id: CommandId) -> Option<Value> {
        let index = self.push.iter().position(|&(pushed, _)| pushed == id)?;
        Some(Value::from_raw(self.push[index].1, &self.transmit[index * FRAME_SIZE ..][command::VALUE]))
    }

    /// perform one transaction with the slave
    pub fn tick(&mut self) -> Result<Tick, Error> {
        match self.state {
            SyncState::Unsynchronized => self.handshake(),
            SyncState::Synchronized => self.exchange(),
        }
    }

    fn handshake(&mut self) -> Result<Tick, Error> {
        let probe = sync::probe();
        let received = &mut self.receive[.. probe.len()];
        if let Err(err) = self.bus.transfer(received, &probe) {
            error!("{}: handshake transfer failed: {:?}", self.config.name, err.kind());
            return Err(self.failure(Error::Bus(err.kind())));
        }
        if sync::verify(received) {
            info!("{}: synchronized", self.config.name);
            self.state = SyncState::Synchronized;
            self.stats.resyncs += 1;
            return Ok(Tick::Synchronized);
        }
        debug!("{}: handshake not answered: {:?}", self.config.name, received);
        self.failures += 1;
        match self.config.restart_policy {
            RestartPolicy::AfterConsecutive(limit) if self.failures >= limit => self.restart()?,
            _ => {},
        }
        Ok(Tick::Unsynchronized)
    }

    fn exchange(&mut self) -> Result<Tick, Error> {
        let pushed = self.push.len() * FRAME_SIZE;
        self.supplier.fill(&mut PushFrames {
            buffer: &mut self.transmit[.. pushed],
            layout: &self.push,
        });
        let size = self.transmit.len();
        if let Err(err) = self.bus.transfer(&mut self.receive[.. size], &self.transmit) {
            error!("{}: transfer failed: {:?}", self.config.name, err.kind());
            return Err(self.failure(Error::Bus(err.kind())));
        }
        match self.validator.validate(&self.transmit, &self.receive[.. size]) {
            Ok(accepted) => {
                debug!("{}: transaction accepted: {:?}", self.config.name, accepted);
                self.failures = 0;
                self.stats.transactions += 1;
                Ok(Tick::Exchanged(accepted))
            },
            Err(err) => {
                warn!("{}: transaction rejected: {}", self.config.name, err);
                Err(self.failure(Error::Frame(err)))
            },
        }
    }

    /// account a failed transaction, resetting the slave if the policy says so
    fn failure(&mut self, error: Error) -> Error {
        self.state = SyncState::Unsynchronized;
        self.failures += 1;
        self.stats.failures += 1;
        let restart = match self.config.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::EveryFailure => true,
            RestartPolicy::AfterConsecutive(limit) => self.failures >= limit,
        };
        if restart {
            if let Err(failed) = self.restart() {
                return failed;
            }
        }
        error
    }

    /// hard reset the slave by pulsing its restart line, blocking for [SlotConfig::restart_pulse]
    pub fn restart(&mut self) -> Result<(), Error> {
        warn!("{}: restarting slave on chip select {}", self.config.name, self.config.chip_select);
        self.state = SyncState::Unsynchronized;
        self.failures = 0;
        self.restart_line.set_low().map_err(|err| Error::Restart(err.kind()))?;
        self.delay.delay_us(u32::try_from(self.config.restart_pulse.as_micros()).unwrap_or(u32::MAX));
        self.restart_line.set_high().map_err(|err| Error::Restart(err.kind()))?;
        self.stats.restarts += 1;
        Ok(())
    }
}
