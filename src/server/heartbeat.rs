//! Successor probing cadence.

use crate::utils::ChordletError;

use rand::prelude::*;

use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};

/// Ticker driving the successor probing rounds.
pub(crate) struct Heartbeater {
    /// Interval between probing rounds.
    send_interval: Interval,
}

impl Heartbeater {
    /// Creates a new probing ticker. The first round fires after a random
    /// fraction of one interval so that peers launched together do not probe
    /// in lockstep.
    pub(crate) fn new_and_setup(
        send_interval: Duration,
    ) -> Result<Heartbeater, ChordletError> {
        if send_interval < Duration::from_millis(1) {
            return logged_err!(
                "invalid probing send_interval {:?}",
                send_interval
            );
        }

        let offset_ms =
            thread_rng().gen_range(0..=send_interval.as_millis() as u64);
        let start = Instant::now() + Duration::from_millis(offset_ms);
        let mut send_interval = time::interval_at(start, send_interval);
        send_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok(Heartbeater { send_interval })
    }

    /// Waits for the next probing round. Typically, this should be used as a
    /// branch of a `tokio::select!`.
    pub(crate) async fn tick(&mut self) {
        self.send_interval.tick().await;
    }
}

#[cfg(test)]
mod heartbeat_tests {
    use super::*;

    #[test]
    fn invalid_interval() {
        assert!(Heartbeater::new_and_setup(Duration::ZERO).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn ticks_at_interval() -> Result<(), ChordletError> {
        let mut hb = Heartbeater::new_and_setup(Duration::from_millis(50))?;
        hb.tick().await; // random first offset within one interval
        let start = Instant::now();
        hb.tick().await;
        hb.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
        Ok(())
    }
}
