//! Request interceptors applied by the router.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::server::SharedState;
use crate::api_client::types::ErrorBody;
use crate::auth::{AuthError, Credentials};
use crate::tracing::prelude::*;
use crate::user::User;

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

const CHALLENGE: &str = r#"Basic realm="laundrymeter""#;

/// Reject requests without valid credentials.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = match request.headers().get(AUTHORIZATION) {
        None => Err(AuthError::Missing),
        Some(value) => value
            .to_str()
            .map_err(|_| AuthError::Malformed)
            .and_then(Credentials::from_authorization),
    };

    let result = match credentials {
        Ok(credentials) => state.authenticator.authenticate(&credentials).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(user) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Err(e) => auth_failure(e),
    }
}

fn auth_failure(error: AuthError) -> Response {
    let status = match &error {
        AuthError::Missing | AuthError::Malformed | AuthError::Rejected => {
            debug!(error = %error, "Authentication failed");
            StatusCode::UNAUTHORIZED
        }
        AuthError::Provider(_) => {
            warn!(error = %error, "Identity provider unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
        AuthError::Store(_) => {
            error!(error = %error, "Authentication lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut response = (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    }
    response
}
