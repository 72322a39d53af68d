//! Basic authentication in front of the WebDAV routes.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::{Method, header},
    middleware::Next,
    response::Response,
};

/// Let a request through when it carries the configured credentials.
///
/// `OPTIONS` is always allowed so clients can discover the server before
/// authenticating. Without configured credentials every request passes.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(credentials) = state.credentials.as_ref() else {
        return Ok(next.run(request).await);
    };
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if credentials.matches(authorization) {
        return Ok(next.run(request).await);
    }

    tracing::debug!(
        "rejected {} {}: bad or missing credentials",
        request.method(),
        request.uri().path()
    );
    Err(AppError::unauthorized())
}
