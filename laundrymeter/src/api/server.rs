//! Router assembly and the HTTP server task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use super::middleware::require_auth;
use super::v0;
use crate::auth::Authenticator;
use crate::service::LaundryService;
use crate::tracing::prelude::*;

const API_PREFIX: &str = "/api/v0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 7786)),
        }
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct SharedState {
    pub service: LaundryService,
    pub authenticator: Arc<dyn Authenticator>,
}

#[derive(OpenApi)]
#[openapi(info(
    title = "Laundrymeter API",
    description = "Washing machine status and completion notifications."
))]
struct ApiDoc;

/// Build the full application router.
///
/// Requests pass the trace layer first, then, for everything except the
/// health check and the OpenAPI document, the authentication layer.
pub fn router(state: SharedState) -> Router {
    let (public, mut openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest(API_PREFIX, v0::public_routes())
        .split_for_parts();

    let (protected, protected_api) = OpenApiRouter::new()
        .nest(API_PREFIX, v0::protected_routes())
        .split_for_parts();
    openapi.merge(protected_api);

    let protected =
        protected.route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .route(
            &format!("{API_PREFIX}/openapi.json"),
            get(move || async move { Json(openapi) }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
