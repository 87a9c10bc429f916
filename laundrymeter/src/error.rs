//! Crate-level error type for startup and wiring.
//!
//! Component errors (`SensorError`, `StoreError`, ...) live next to the
//! component that produces them. This type only collects the ones that
//! can abort startup.

use thiserror::Error;

use crate::config::ConfigError;
use crate::notify::NotificationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification setup failed: {0}")]
    Notify(#[from] NotificationError),

    #[error("failed to bind API listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
