//! Ping/pong liveness timers.

use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};

/// Which timer is armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting to send the next PING.
    Interval,
    /// PING sent, waiting for the PONG.
    Timeout,
}

/// Two alternating timers driven by the session control loop.
///
/// Expiry in [`Phase::Interval`] means "send a PING now"; expiry in
/// [`Phase::Timeout`] means the client went silent.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    phase: Phase,
    deadline: Instant,
}

impl Heartbeat {
    /// Start in the interval phase.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            phase: Phase::Interval,
            deadline: Instant::now() + interval,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// When the armed timer fires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// A PING went out: arm the timeout timer.
    pub fn ping_sent(&mut self) {
        self.phase = Phase::Timeout;
        self.deadline = Instant::now() + self.timeout;
    }

    /// A PONG arrived. Returns `false` if no PING was outstanding.
    pub fn pong_received(&mut self) -> bool {
        if self.phase != Phase::Timeout {
            return false;
        }
        self.phase = Phase::Interval;
        self.deadline = Instant::now() + self.interval;
        true
    }

    /// Sleep until the armed timer fires.
    pub fn expired(&self) -> Sleep {
        sleep_until(self.deadline)
    }
}
