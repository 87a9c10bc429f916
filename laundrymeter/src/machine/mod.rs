mod config;
mod estimator;
mod sample;

pub use config::EstimatorConfig;
pub use estimator::{Observation, StateEstimator};
pub use sample::Sample;
