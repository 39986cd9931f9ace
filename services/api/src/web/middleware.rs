//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use ride_platform_core::ports::PortError;
use ride_platform_core::{Caller, ServiceError};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Pulls the session token from the `session` cookie or a bearer header.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        });
    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    };
    from_cookie.or_else(from_bearer).map(str::trim).filter(|t| !t.is_empty())
}

/// Middleware that validates the session and inserts the `Caller`.
///
/// If missing or invalid, the request ends with 401 and the error envelope.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers()).ok_or(ServiceError::Unauthenticated)?;

    let caller = match state.sessions.validate_session(token).await {
        Ok(caller) => caller,
        Err(PortError::Unauthorized) | Err(PortError::NotFound(_)) => {
            debug!("Rejected unknown or expired session");
            return Err(ServiceError::Unauthenticated.into());
        }
        Err(e) => return Err(ServiceError::from(e).into()),
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Runs after `require_auth`; lets only admins through.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<Caller>() {
        Some(caller) if caller.is_admin() => Ok(next.run(req).await),
        Some(_) => Err(ServiceError::forbidden("administrator access required").into()),
        None => Err(ServiceError::Unauthenticated.into()),
    }
}
