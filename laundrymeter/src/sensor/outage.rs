//! One-shot alarm for sustained sensor outages.
//!
//! Single failed reads are routine (the plug drops off Wi-Fi for a few
//! seconds now and then) and are logged quietly. An outage that lasts
//! longer than the alarm delay is worth a warning, once, and so is the
//! recovery afterwards.
//!
//! ```text
//!        record(false)            elapsed >= delay
//!  Healthy ──────────► Failing ──────────────────► Alarmed
//!     ▲                  │                           │
//!     │   record(true)   │        record(true)       │
//!     └──────────────────┴───────────────────────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// What [`OutageAlarm::record`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageStatus {
    /// Read succeeded and no alarm was raised.
    Healthy,

    /// Read failed, outage shorter than the alarm delay.
    Failing,

    /// Outage just crossed the alarm delay. Returned once per outage.
    Alarmed { since: Instant },

    /// Already alarmed and still failing.
    Ongoing,

    /// First successful read after an alarmed outage.
    Recovered { downtime: Duration },
}

#[derive(Debug)]
enum State {
    Healthy,
    Failing(Instant),
    Alarmed(Instant),
}

#[derive(Debug)]
pub struct OutageAlarm {
    delay: Duration,
    state: State,
}

impl OutageAlarm {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: State::Healthy,
        }
    }

    /// Feed the outcome of one sensor read.
    pub fn record(&mut self, read_ok: bool) -> OutageStatus {
        match (&self.state, read_ok) {
            (State::Healthy, true) => OutageStatus::Healthy,

            (State::Healthy, false) => {
                self.state = State::Failing(Instant::now());
                OutageStatus::Failing
            }

            (State::Failing(_), true) => {
                self.state = State::Healthy;
                OutageStatus::Healthy
            }

            (State::Failing(since), false) => {
                let since = *since;
                if since.elapsed() >= self.delay {
                    self.state = State::Alarmed(since);
                    OutageStatus::Alarmed { since }
                } else {
                    OutageStatus::Failing
                }
            }

            (State::Alarmed(since), true) => {
                let downtime = since.elapsed();
                self.state = State::Healthy;
                OutageStatus::Recovered { downtime }
            }

            (State::Alarmed(_), false) => OutageStatus::Ongoing,
        }
    }

    pub fn is_alarmed(&self) -> bool {
        matches!(self.state, State::Alarmed(_))
    }
}
