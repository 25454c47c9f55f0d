/*!
    liveness watchdog

    an external source (remote control, decision engine) increments the watchdog for every command it delivers. Every period the watchdog checks it was incremented often enough, otherwise it triggers a safety action. This is independent from the link synchronization: a perfectly synchronized bus can still carry commands from a dead source.
*/

use core::{
    sync::atomic::{AtomicU32, AtomicBool, Ordering::*},
    time::Duration,
    };
use log::*;


/// watchdog settings
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// minimum number of increments expected per period
    pub threshold: u32,
    /// time between checks
    pub period: Duration,
}
impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            period: Duration::from_millis(500),
        }
    }
}
impl WatchdogConfig {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// outcome of the last check
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// the source was alive during last period
    Armed,
    /// the source was not alive during last period, the safety action was triggered
    Tripped,
}

pub struct Watchdog {
    config: WatchdogConfig,
    counter: AtomicU32,
    tripped: AtomicBool,
}
impl Watchdog {
    pub const fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            counter: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
        }
    }
    pub fn config(&self) -> &WatchdogConfig {&self.config}
    /// report a command was accepted from the watched source
    pub fn increment(&self) {
        self.counter.fetch_add(1, Relaxed);
    }
    /// increments since last check
    pub fn count(&self) -> u32 {
        self.counter.load(Relaxed)
    }
    pub fn state(&self) -> Liveness {
        if self.tripped.load(Acquire)  {Liveness::Tripped}
        else  {Liveness::Armed}
    }
    /**
        check the increments of the period that just ended, calling `on_trip` if there was not enough.

        the counter is reset whatever the outcome
    */
    pub fn check(&self, on_trip: impl FnOnce()) -> Liveness {
        let count = self.counter.swap(0, AcqRel);
        if count < self.config.threshold {
            warn!("watchdog tripped: {} commands received, {} expected", count, self.config.threshold);
            self.tripped.store(true, Release);
            on_trip();
            Liveness::Tripped
        }
        else {
            if self.tripped.swap(false, AcqRel) {
                info!("watchdog rearmed: source alive again");
            }
            Liveness::Armed
        }
    }
    /// check periodically, forever
    #[cfg(feature = "master")]
    pub async fn run(&self, mut on_trip: impl FnMut()) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately, the first check happens after a full period
        interval.tick().await;
        loop {
            interval.tick().await;
            self.check(&mut on_trip);
        }
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_source() {
        let watchdog = Watchdog::new(WatchdogConfig::default().with_threshold(3));
        for _ in 0 .. 3 {
            watchdog.increment();
        }
        let mut trips = 0;
        assert_eq!(watchdog.check(|| trips += 1), Liveness::Armed);
        assert_eq!(trips, 0);
        assert_eq!(watchdog.count(), 0);
    }

    #[test]
    fn dead_source() {
        let watchdog = Watchdog::new(WatchdogConfig::default().with_threshold(3));
        watchdog.increment();
        watchdog.increment();
        let mut trips = 0;
        assert_eq!(watchdog.check(|| trips += 1), Liveness::Tripped);
        assert_eq!(trips, 1);
        assert_eq!(watchdog.count(), 0);
        assert_eq!(watchdog.state(), Liveness::Tripped);

        // recovers as soon as the source is back
        for _ in 0 .. 5 {
            watchdog.increment();
        }
        assert_eq!(watchdog.check(|| trips += 1), Liveness::Armed);
        assert_eq!(watchdog.state(), Liveness::Armed);
        assert_eq!(trips, 1);
    }

    #[cfg(feature = "master")]
    #[tokio::test(start_paused = true)]
    async fn periodic_checks() {
        let period = Duration::from_millis(100);
        let watchdog = Watchdog::new(WatchdogConfig::default()
            .with_threshold(1)
            .with_period(period));
        let mut trips = 0;
        let _ = tokio::time::timeout(period * 7 / 2, watchdog.run(|| trips += 1)).await;
        assert_eq!(trips, 3);
        assert_eq!(watchdog.count(), 0);
    }
}
