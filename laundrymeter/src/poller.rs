//! The periodic sampling loop.
//!
//! Every tick reads the sensor, feeds the power draw to the state
//! estimator, appends a sample to history and, on a running to idle
//! edge, hands a notification round to a background task. Nothing a tick
//! does can end the loop; errors are logged and the next tick starts
//! fresh.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::clock::Clock;
use crate::machine::{Sample, StateEstimator};
use crate::notify::TransitionNotifier;
use crate::sensor::{OutageAlarm, OutageStatus, Sensor, SensorError};
use crate::store::{Eviction, History, StoreError};
use crate::tracing::prelude::*;

/// How failed sensor reads feed the estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutagePolicy {
    /// A failed read counts as 0 W. An outage longer than the debounce
    /// window ends a run.
    #[default]
    TreatAsIdle,
    /// Failed reads leave the estimator alone. An outage never ends a run.
    Hold,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub outage_policy: OutagePolicy,
    /// Sensor outage length that raises a warning.
    pub outage_alarm_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            outage_policy: OutagePolicy::TreatAsIdle,
            outage_alarm_secs: 60,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Everything one tick needs, owned by the loop.
pub struct PollerContext {
    pub estimator: StateEstimator,
    pub sensor: Arc<dyn Sensor>,
    pub history: History,
    pub clock: Arc<dyn Clock>,
    pub config: PollerConfig,
}

/// The last sample successfully written to history.
#[derive(Debug, Clone, Copy)]
struct Written {
    running: bool,
    last_changed: Option<OffsetDateTime>,
}

pub struct Poller {
    ctx: PollerContext,
    notifier: Arc<TransitionNotifier>,
    notifications: TaskTracker,
    outage: OutageAlarm,
    /// Stable state before the current tick; `None` until anything is known.
    previous_running: Option<bool>,
    last_written: Option<Written>,
    last_timestamp: Option<OffsetDateTime>,
}

impl Poller {
    /// Picks up where the stored history left off. The estimator itself
    /// always starts idle.
    pub fn new(ctx: PollerContext, notifier: Arc<TransitionNotifier>) -> Result<Self, StoreError> {
        let latest = ctx.history.latest()?;
        let outage = OutageAlarm::new(Duration::from_secs(ctx.config.outage_alarm_secs));

        if let Some(sample) = &latest {
            debug!(
                timestamp = %sample.timestamp,
                running = sample.running,
                "Resuming from stored history"
            );
        }

        Ok(Self {
            ctx,
            notifier,
            notifications: TaskTracker::new(),
            outage,
            previous_running: latest.as_ref().map(|s| s.running),
            last_written: latest.as_ref().map(|s| Written {
                running: s.running,
                last_changed: s.last_changed,
            }),
            last_timestamp: latest.map(|s| s.timestamp),
        })
    }

    /// Tick until `shutdown` fires, then wait for in-flight notifications.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = self.ctx.config.interval_secs,
            policy = ?self.ctx.config.outage_policy,
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.notifications.close();
        self.notifications.wait().await;
        info!("Poller stopped");
    }

    /// One pass through sensor, estimator, history and notifier.
    pub async fn tick(&mut self) -> Sample {
        let now = self.next_timestamp();
        let read = self.ctx.sensor.read_realtime().await;
        let read_ok = read.is_ok();

        let sample = match read {
            Ok(reading) => {
                let observation = self.ctx.estimator.observe(reading.power_w);
                if observation.changed {
                    info!(
                        running = observation.running,
                        power_w = %reading.power_w,
                        "Machine state changed"
                    );
                }
                let last_changed = self.last_changed_for(observation.running, now);
                trace!(
                    power_w = %reading.power_w,
                    running = observation.running,
                    below_threshold_ticks = self.ctx.estimator.below_threshold_ticks(),
                    "Poll tick"
                );
                Sample::from_reading(now, observation.running, last_changed, &reading)
            }
            Err(e) => {
                match &e {
                    SensorError::Communication(_) => debug!(error = %e, "Sensor read failed"),
                    SensorError::Protocol(_) => warn!(error = %e, "Sensor returned garbage"),
                }
                if self.ctx.config.outage_policy == OutagePolicy::TreatAsIdle {
                    let observation = self.ctx.estimator.observe(0.0);
                    if observation.changed {
                        info!(running = observation.running, "Machine state changed");
                    }
                }
                Sample::sensor_failure(now)
            }
        };

        self.track_outage(read_ok);
        self.store(&sample);

        let running = self.ctx.estimator.is_running();
        if TransitionNotifier::is_completion(self.previous_running, running) {
            if self.outage.is_alarmed() || !read_ok {
                warn!("Run completed while the sensor is unreachable");
            }
            let notifier = self.notifier.clone();
            self.notifications.spawn(async move {
                notifier.notify_all().await;
            });
        }
        self.previous_running = Some(running);

        sample
    }

    /// Millisecond timestamps, strictly increasing even if the wall clock
    /// stalls or steps back.
    fn next_timestamp(&mut self) -> OffsetDateTime {
        let now = self.ctx.clock.now();
        let now = now.replace_nanosecond(now.millisecond() as u32 * 1_000_000).unwrap_or(now);
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + time::Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// `now` when this sample starts a new run of equal states in the
    /// stored history, otherwise the previous sample's value. Failure
    /// samples end a run.
    fn last_changed_for(&self, running: bool, now: OffsetDateTime) -> OffsetDateTime {
        match self.last_written {
            Some(Written {
                running: previous,
                last_changed: Some(last_changed),
            }) if previous == running => last_changed,
            _ => now,
        }
    }

    fn track_outage(&mut self, read_ok: bool) {
        match self.outage.record(read_ok) {
            OutageStatus::Alarmed { since } => warn!(
                down_for_secs = since.elapsed().as_secs(),
                "Sensor unreachable"
            ),
            OutageStatus::Recovered { downtime } => info!(
                downtime_secs = downtime.as_secs(),
                "Sensor reachable again"
            ),
            OutageStatus::Healthy | OutageStatus::Failing | OutageStatus::Ongoing => {}
        }
    }

    fn store(&mut self, sample: &Sample) {
        match self.ctx.history.append(sample) {
            Ok(eviction) => {
                if eviction != Eviction::Kept {
                    trace!(?eviction, "Retention applied");
                }
                self.last_written = Some(Written {
                    running: sample.running,
                    last_changed: sample.last_changed,
                });
            }
            Err(e) => error!(error = %e, "Failed to store sample"),
        }
    }

    /// Wait for background notification rounds started so far.
    #[cfg(test)]
    async fn settle(&self) {
        self.notifications.close();
        self.notifications.wait().await;
        self.notifications.reopen();
    }
}
