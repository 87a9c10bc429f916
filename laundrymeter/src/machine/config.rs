use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Power draw (W) separating running from idle. Pick a value above
    /// the standby draw and below the lowest draw during a wash.
    pub threshold_w: f64,

    /// Consecutive sub-threshold ticks tolerated before a running
    /// machine is considered finished. Flips on tick `debounce_ticks + 1`.
    pub debounce_ticks: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            threshold_w: 80.0,
            // ~4.7 minutes at the default 5 s poll interval.
            debounce_ticks: 56,
        }
    }
}
