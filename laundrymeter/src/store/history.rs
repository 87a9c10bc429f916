//! History accessor with retention.
//!
//! Every append is followed by a row count. Past the soft limit the single
//! oldest row goes; past the hard limit the overflow policy applies.

use std::sync::Arc;

use serde::Deserialize;

use super::{Result, SampleStore};
use crate::machine::Sample;
use crate::tracing::prelude::*;

/// What to do when the history grows past the hard limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Delete every row.
    #[default]
    Wipe,
    /// Delete the oldest rows down to the soft limit.
    Trim,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub soft_limit: u64,
    pub hard_limit: u64,
    pub overflow: Overflow,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            // One year at a 5 s cadence.
            soft_limit: 6_307_200,
            hard_limit: 6_400_000,
            overflow: Overflow::Wipe,
        }
    }
}

/// What retention did after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    Kept,
    EvictedOldest,
    Wiped(u64),
    Trimmed(u64),
}

#[derive(Clone)]
pub struct History {
    store: Arc<dyn SampleStore>,
    retention: RetentionConfig,
}

impl History {
    pub fn new(store: Arc<dyn SampleStore>, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    /// Append `sample` and enforce retention.
    pub fn append(&self, sample: &Sample) -> Result<Eviction> {
        self.store.append(sample)?;

        let count = self.store.count()?;
        if count > self.retention.hard_limit {
            return match self.retention.overflow {
                Overflow::Wipe => {
                    let deleted = self.store.delete_all()?;
                    warn!(
                        deleted,
                        hard_limit = self.retention.hard_limit,
                        "History exceeded hard limit, wiped"
                    );
                    Ok(Eviction::Wiped(deleted))
                }
                Overflow::Trim => {
                    let deleted = self
                        .store
                        .delete_oldest(count - self.retention.soft_limit)?;
                    warn!(
                        deleted,
                        hard_limit = self.retention.hard_limit,
                        "History exceeded hard limit, trimmed to soft limit"
                    );
                    Ok(Eviction::Trimmed(deleted))
                }
            };
        }

        if count > self.retention.soft_limit {
            self.store.delete_oldest(1)?;
            trace!(count, "Evicted oldest sample");
            return Ok(Eviction::EvictedOldest);
        }

        Ok(Eviction::Kept)
    }

    pub fn latest(&self) -> Result<Option<Sample>> {
        self.store.latest()
    }

    pub fn range(&self, limit: usize) -> Result<Vec<Sample>> {
        self.store.range(limit)
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count()
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::store::SqliteStore;

    fn sample(i: i64) -> Sample {
        Sample::sensor_failure(datetime!(2025-01-01 00:00 UTC) + Duration::seconds(i * 5))
    }

    fn history(soft_limit: u64, hard_limit: u64, overflow: Overflow) -> History {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        History::new(
            store,
            RetentionConfig {
                soft_limit,
                hard_limit,
                overflow,
            },
        )
    }

    #[test]
    fn soft_limit_evicts_one_per_append() {
        let history = history(3, 10, Overflow::Wipe);
        for i in 0..3 {
            assert_eq!(history.append(&sample(i)).unwrap(), Eviction::Kept);
        }

        for i in 3..8 {
            assert_eq!(history.append(&sample(i)).unwrap(), Eviction::EvictedOldest);
            assert_eq!(history.count().unwrap(), 3);
        }

        let kept: Vec<_> = history
            .range(10)
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(
            kept,
            vec![sample(7).timestamp, sample(6).timestamp, sample(5).timestamp]
        );
    }

    // Rows written before retention was configured this tight.
    fn preload(history: &History, n: i64) {
        for i in 0..n {
            history.store.append(&sample(i)).unwrap();
        }
    }

    #[test]
    fn hard_limit_wipes_everything() {
        let history = history(3, 5, Overflow::Wipe);
        preload(&history, 5);

        assert_eq!(history.append(&sample(5)).unwrap(), Eviction::Wiped(6));
        assert_eq!(history.count().unwrap(), 0);

        assert_eq!(history.append(&sample(6)).unwrap(), Eviction::Kept);
        assert_eq!(history.count().unwrap(), 1);
    }

    #[test]
    fn hard_limit_trim_keeps_newest() {
        let history = history(3, 5, Overflow::Trim);
        preload(&history, 5);

        assert_eq!(history.append(&sample(5)).unwrap(), Eviction::Trimmed(3));
        assert_eq!(history.count().unwrap(), 3);
        assert_eq!(
            history.latest().unwrap().map(|s| s.timestamp),
            Some(sample(5).timestamp)
        );
    }

    #[test]
    fn never_exceeds_hard_limit() {
        let history = history(4, 6, Overflow::Wipe);
        for i in 0..50 {
            history.append(&sample(i)).unwrap();
            assert!(history.count().unwrap() <= 6);
        }
    }

    #[test]
    fn failed_append_leaves_history_untouched() {
        let history = history(3, 10, Overflow::Wipe);
        history.append(&sample(0)).unwrap();
        assert!(history.append(&sample(0)).is_err());
        assert_eq!(history.count().unwrap(), 1);
    }
}
