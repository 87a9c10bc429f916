//! HTTP API.

mod middleware;
mod server;
mod v0;

pub use middleware::CurrentUser;
pub use server::{ApiConfig, SharedState, router, serve};
#[cfg(test)]
pub(crate) use server::tests::test_state;
