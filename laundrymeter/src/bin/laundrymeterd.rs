//! The laundrymeter daemon.
//!
//! Usage: `laundrymeterd [--config <path>]`. The config path can also be
//! given in LAUNDRYMETER_CONFIG; without either, defaults are used.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use laundrymeter::config::Config;
use laundrymeter::daemon::Daemon;
use laundrymeter::tracing::{self, prelude::*};

fn config_path() -> Result<Option<PathBuf>> {
    let mut args = env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (None, _) => Ok(env::var_os("LAUNDRYMETER_CONFIG").map(PathBuf::from)),
        (Some("--config" | "-c"), Some(path)) => Ok(Some(PathBuf::from(path))),
        (Some(arg), _) => {
            bail!("unexpected argument {arg}; usage: laundrymeterd [--config <path>]")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let path = config_path()?;
    let mut config = Config::load(path.as_deref()).context("failed to load configuration")?;
    config
        .apply_env(|var| env::var(var).ok())
        .context("invalid environment override")?;
    match &path {
        Some(path) => info!(config = %path.display(), "Starting laundrymeter"),
        None => info!("Starting laundrymeter with default configuration"),
    }

    let daemon = Daemon::build(config).await.context("startup failed")?;

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = on_signal.cancelled() => return,
        }
        on_signal.cancel();
    });

    daemon.run(shutdown).await;
    Ok(())
}
