//! Debounced running/idle estimation from raw power draw.
//!
//! Power during a wash is spiky: the drum pauses between agitation
//! pulses and draw drops close to standby. Rising above the threshold is
//! trusted immediately, falling below it only once it has stayed below
//! for more than `debounce_ticks` consecutive observations.

use super::config::EstimatorConfig;

/// Result of feeding one power reading to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub running: bool,
    /// True exactly when `running` flipped on this observation.
    pub changed: bool,
}

#[derive(Debug)]
pub struct StateEstimator {
    config: EstimatorConfig,
    running: bool,
    below_threshold_ticks: u32,
}

impl StateEstimator {
    /// Starts idle. Debounce state is not recovered across restarts.
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            running: false,
            below_threshold_ticks: 0,
        }
    }

    pub fn observe(&mut self, power_w: f64) -> Observation {
        let threshold = self.config.threshold_w;
        let previous = self.running;

        if !self.running {
            if power_w > threshold {
                self.running = true;
            }
        } else if power_w < threshold {
            self.below_threshold_ticks += 1;
            if self.below_threshold_ticks > self.config.debounce_ticks {
                self.running = false;
                self.below_threshold_ticks = 0;
            }
        } else {
            self.below_threshold_ticks = 0;
        }

        Observation {
            running: self.running,
            changed: self.running != previous,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn below_threshold_ticks(&self) -> u32 {
        self.below_threshold_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn estimator(threshold_w: f64, debounce_ticks: u32) -> StateEstimator {
        StateEstimator::new(EstimatorConfig {
            threshold_w,
            debounce_ticks,
        })
    }

    fn run(estimator: &mut StateEstimator, powers: &[f64]) -> Vec<bool> {
        powers.iter().map(|&p| estimator.observe(p).running).collect()
    }

    #[test]
    fn flips_idle_after_more_than_n_low_ticks() {
        let mut e = estimator(50.0, 3);
        let states = run(&mut e, &[60.0, 60.0, 10.0, 10.0, 10.0, 10.0]);
        assert_eq!(states, vec![true, true, true, true, true, false]);
        assert_eq!(e.below_threshold_ticks(), 0);
    }

    #[test]
    fn changed_only_on_flips() {
        let mut e = estimator(50.0, 1);
        let changed: Vec<bool> = [10.0, 60.0, 60.0, 10.0, 10.0, 10.0]
            .iter()
            .map(|&p| e.observe(p).changed)
            .collect();
        assert_eq!(changed, vec![false, true, false, false, true, false]);
    }

    #[test]
    fn rise_from_idle_is_immediate() {
        let mut e = estimator(80.0, 56);
        let obs = e.observe(80.1);
        assert_eq!(
            obs,
            Observation {
                running: true,
                changed: true
            }
        );
    }

    // Rising edge needs strictly more than T; falling edge needs strictly less.
    #[test_case(false, 50.0, false ; "idle stays idle at threshold")]
    #[test_case(false, 50.5, true ; "idle starts above threshold")]
    #[test_case(true, 50.0, true ; "running holds at threshold")]
    #[test_case(true, 49.9, true ; "running tolerates a single dip")]
    fn threshold_boundaries(start_running: bool, power_w: f64, expected: bool) {
        let mut e = estimator(50.0, 3);
        if start_running {
            e.observe(100.0);
        }
        assert_eq!(e.observe(power_w).running, expected);
    }

    #[test]
    fn reading_at_threshold_resets_counter() {
        let mut e = estimator(50.0, 3);
        e.observe(60.0);
        run(&mut e, &[10.0, 10.0, 10.0]);
        assert_eq!(e.below_threshold_ticks(), 3);

        e.observe(50.0);
        assert_eq!(e.below_threshold_ticks(), 0);

        let states = run(&mut e, &[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(states, vec![true, true, true, false]);
    }

    #[test]
    fn spiky_wash_never_completes_early() {
        let mut e = estimator(80.0, 4);
        e.observe(2000.0);
        for _ in 0..50 {
            let states = run(&mut e, &[5.0, 5.0, 5.0, 400.0]);
            assert!(states.iter().all(|&r| r));
        }
        assert!(e.is_running());
    }

    #[test]
    fn zero_debounce_flips_on_first_low_tick() {
        let mut e = estimator(50.0, 0);
        e.observe(60.0);
        assert!(!e.observe(10.0).running);
    }

    #[test]
    fn idle_ignores_low_readings() {
        let mut e = estimator(50.0, 3);
        for _ in 0..10 {
            let obs = e.observe(0.0);
            assert!(!obs.running);
            assert!(!obs.changed);
        }
        assert_eq!(e.below_threshold_ticks(), 0);
    }
}
