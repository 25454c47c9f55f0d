use std::{
    boxed::Box,
    time::{Duration, Instant},
    };
use embedded_hal::{
    spi::SpiDevice,
    digital::OutputPin,
    delay::DelayNs,
    };
use log::*;

use crate::sync::SyncState;
use super::{
    Error,
    slot::{Slot, Tick, LinkStats},
    };


/// maximum number of slaves sharing a bus
pub const MAX_SLOTS: usize = 3;

/// a link the scheduler can give turns on the bus to
pub trait Link {
    fn name(&self) -> &str;
    /// time between two ticks
    fn period(&self) -> Duration;
    fn state(&self) -> SyncState;
    fn stats(&self) -> LinkStats;
    /// perform one transaction
    fn tick(&mut self) -> Result<Tick, Error>;
}
impl<S: SpiDevice, R: OutputPin, D: DelayNs> Link for Slot<S, R, D> {
    fn name(&self) -> &str {&self.config().name}
    fn period(&self) -> Duration {self.config().period}
    fn state(&self) -> SyncState {Slot::state(self)}
    fn stats(&self) -> LinkStats {Slot::stats(self)}
    fn tick(&mut self) -> Result<Tick, Error> {Slot::tick(self)}
}

struct Scheduled<'a> {
    link: Box<dyn Link + 'a>,
    /// time of next tick, `None` until the first tick
    next: Option<Instant>,
}

/**
    round robin over the slots of a bus

    slots are ticked in the order they were added, each at its own period. A slot whose deadline was missed is ticked once and its next deadline stays aligned on its period.
*/
pub struct Scheduler<'a> {
    slots: heapless::Vec<Scheduled<'a>, MAX_SLOTS>,
}
impl<'a> Scheduler<'a> {
    pub fn new() -> Self {
        Self {slots: heapless::Vec::new()}
    }
    /// add a slot, returning its index
    pub fn add(&mut self, link: impl Link + 'a) -> Result<usize, Error> {
        assert!(! link.period().is_zero(), "slot {} has a zero period", link.name());
        let index = self.slots.len();
        self.slots.push(Scheduled {link: Box::new(link), next: None})
            .map_err(|_| Error::Full)?;
        Ok(index)
    }
    pub fn len(&self) -> usize {self.slots.len()}
    pub fn is_empty(&self) -> bool {self.slots.is_empty()}
    pub fn link(&self, index: usize) -> Option<&(dyn Link + 'a)> {
        self.slots.get(index).map(|scheduled| scheduled.link.as_ref())
    }
    /// earliest deadline among slots already ticked, `None` if a slot was never ticked or there is no slot
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter()
            .map(|scheduled| scheduled.next)
            .collect::<Option<heapless::Vec<_, MAX_SLOTS>>>()?
            .into_iter()
            .min()
    }

    /// tick every slot due at `now`, returns the number of slots ticked
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut ticked = 0;
        for scheduled in self.slots.iter_mut() {
            if scheduled.next.is_some_and(|next| next > now) {
                continue;
            }
            let link = &mut scheduled.link;
            match link.tick() {
                Ok(Tick::Exchanged(accepted)) => trace!("{}: {} frames exchanged", link.name(), accepted.len()),
                Ok(Tick::Synchronized) => debug!("{}: link synchronized", link.name()),
                Ok(Tick::Unsynchronized) => trace!("{}: waiting for handshake", link.name()),
                Err(err) => warn!("{}: {}", link.name(), err),
            }
            ticked += 1;

            let period = link.period();
            let mut next = scheduled.next.unwrap_or(now) + period;
            if next <= now {
                debug!("{}: missed deadline", link.name());
                while next <= now {
                    next += period;
                }
            }
            scheduled.next = Some(next);
        }
        ticked
    }

    /// tick slots forever, sleeping between deadlines
    pub async fn run(&mut self) {
        if self.is_empty() {
            warn!("no slot to schedule");
            return;
        }
        loop {
            self.poll(tokio::time::Instant::now().into_std());
            if let Some(deadline) = self.next_deadline() {
                tokio::time::sleep_until(deadline.into()).await;
            }
        }
    }
}
impl Default for Scheduler<'_> {
    fn default() -> Self {Self::new()}
}
