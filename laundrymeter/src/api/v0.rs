//! API v0 endpoints.
//!
//! Version 0 signals an unstable API; breaking changes are expected
//! until 1.0.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::middleware::CurrentUser;
use super::server::SharedState;
use crate::api_client::types::{
    ChatRegistration, ErrorBody, MachineDebug, MachineStatus, Subscribers, Subscription,
    TokenResponse,
};
use crate::service::ServiceError;
use crate::tracing::prelude::*;
use crate::user::Channel;

/// Routes reachable without credentials.
pub fn public_routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new().routes(routes!(health))
}

/// Routes behind the authentication middleware.
pub fn protected_routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(get_token))
        .routes(routes!(get_machine))
        .routes(routes!(get_machine_debug))
        .routes(routes!(get_history))
        .routes(routes!(list_subscribers, subscribe, unsubscribe))
        .routes(routes!(register_chat))
}

pub enum ApiError {
    NoSample,
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NoSample => (StatusCode::NOT_FOUND, "no samples recorded yet".to_string()),
            ApiError::Service(e) => {
                let status = match &e {
                    ServiceError::Store(_) => {
                        error!(error = %e, "Request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    ServiceError::ChatNotRegistered | ServiceError::UnknownToken => {
                        StatusCode::BAD_REQUEST
                    }
                    ServiceError::ChatUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Issue a new API token, invalidating the previous one.
#[utoipa::path(
    get,
    path = "/auth/token",
    tag = "auth",
    responses(
        (status = OK, description = "Fresh token", body = TokenResponse),
        (status = UNAUTHORIZED, description = "Missing or invalid credentials", body = ErrorBody),
    ),
)]
async fn get_token(
    State(state): State<SharedState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.service.issue_auth_token(&user)?;
    Ok(Json(TokenResponse { token }))
}

/// Whether the machine is running.
#[utoipa::path(
    get,
    path = "/machine",
    tag = "machine",
    responses(
        (status = OK, description = "Latest status", body = MachineStatus),
        (status = NOT_FOUND, description = "Nothing recorded yet", body = ErrorBody),
    ),
)]
async fn get_machine(State(state): State<SharedState>) -> Result<Json<MachineStatus>, ApiError> {
    state
        .service
        .get_latest_status()?
        .map(Json)
        .ok_or(ApiError::NoSample)
}

/// Latest sample including raw meter readings.
#[utoipa::path(
    get,
    path = "/machine/debug",
    tag = "machine",
    responses(
        (status = OK, description = "Latest sample", body = MachineDebug),
        (status = NOT_FOUND, description = "Nothing recorded yet", body = ErrorBody),
    ),
)]
async fn get_machine_debug(
    State(state): State<SharedState>,
) -> Result<Json<MachineDebug>, ApiError> {
    state
        .service
        .get_debug_status()?
        .map(Json)
        .ok_or(ApiError::NoSample)
}

/// The last `count` samples, most recent first.
#[utoipa::path(
    get,
    path = "/machine/history/{count}",
    tag = "machine",
    params(
        ("count" = usize, Path, description = "Number of samples, at most 10000"),
    ),
    responses(
        (status = OK, description = "Samples, newest first", body = Vec<MachineDebug>),
    ),
)]
async fn get_history(
    State(state): State<SharedState>,
    Path(count): Path<usize>,
) -> Result<Json<Vec<MachineDebug>>, ApiError> {
    Ok(Json(state.service.get_history(count)?))
}

/// Users waiting for the next completion on a channel.
#[utoipa::path(
    get,
    path = "/notify/{channel}",
    tag = "notify",
    params(
        ("channel" = Channel, Path, description = "email or chat"),
    ),
    responses(
        (status = OK, description = "Subscribed users", body = Subscribers),
    ),
)]
async fn list_subscribers(
    State(state): State<SharedState>,
    Path(channel): Path<Channel>,
) -> Result<Json<Subscribers>, ApiError> {
    let names = state.service.subscribers(channel)?;
    Ok(Json(Subscribers { channel, names }))
}

/// Get notified on the next completion.
#[utoipa::path(
    post,
    path = "/notify/{channel}",
    tag = "notify",
    params(
        ("channel" = Channel, Path, description = "email or chat"),
    ),
    responses(
        (status = OK, description = "Subscribed", body = Subscription),
        (status = BAD_REQUEST, description = "No chat registered", body = ErrorBody),
    ),
)]
async fn subscribe(
    State(state): State<SharedState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(channel): Path<Channel>,
) -> Result<Json<Subscription>, ApiError> {
    let user = state.service.set_preference(&user, channel, true)?;
    Ok(Json(Subscription {
        channel,
        enabled: user.wants(channel),
    }))
}

/// Cancel a pending notification.
#[utoipa::path(
    delete,
    path = "/notify/{channel}",
    tag = "notify",
    params(
        ("channel" = Channel, Path, description = "email or chat"),
    ),
    responses(
        (status = OK, description = "Unsubscribed", body = Subscription),
    ),
)]
async fn unsubscribe(
    State(state): State<SharedState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(channel): Path<Channel>,
) -> Result<Json<Subscription>, ApiError> {
    let user = state.service.set_preference(&user, channel, false)?;
    Ok(Json(Subscription {
        channel,
        enabled: user.wants(channel),
    }))
}

/// Start binding a chat to the caller's account.
#[utoipa::path(
    post,
    path = "/notify/chat/register",
    tag = "notify",
    responses(
        (status = OK, description = "Registration link", body = ChatRegistration),
        (status = SERVICE_UNAVAILABLE, description = "Chat bot not configured", body = ErrorBody),
    ),
)]
async fn register_chat(
    State(state): State<SharedState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ChatRegistration>, ApiError> {
    let link = state.service.issue_chat_link(&user)?;
    Ok(Json(ChatRegistration { link }))
}
