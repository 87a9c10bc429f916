use std::time::Duration;

use rand::Rng;

/// Exponential backoff for retrying the update poll.
///
/// Starts at `initial` and doubles after each call to `next_delay()`,
/// capping at `max`. Each returned delay is jittered to [0.5, 1.0) of
/// the nominal value.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.current;
        self.current = (self.current * 2).min(self.max);
        nominal.mul_f64(rand::thread_rng().gen_range(0.5..1.0))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
