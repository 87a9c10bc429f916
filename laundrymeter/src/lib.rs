//! Laundrymeter notifies you when the laundry is ready.
//!
//! A poller samples a smart plug's energy meter every few seconds,
//! debounces the power draw into a stable running/idle state, stores
//! the time series in SQLite and, when a run completes, notifies every
//! user who asked to be told (by email or through the chat bot). A
//! small REST API and the bot expose the status and let users opt in.

pub mod api;
pub mod api_client;
pub mod auth;
pub mod bot;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod machine;
pub mod notify;
pub mod poller;
pub mod sensor;
pub mod service;
pub mod store;
pub mod tracing;
pub mod user;
