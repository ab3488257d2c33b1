//! HTTP middleware: authentication, access logging, panic recovery

use std::any::Any;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use crate::server::AppState;
use crate::sessions::SessionStoreError;
use crate::types::{error_codes, ApiResponse};

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::error(error_codes::UNAUTHORIZED, message)),
    )
        .into_response()
}

/// Bearer-token authentication for protected routes.
///
/// Looks the token up, evicts expired sessions, and injects the session
/// into the request extensions for handlers to use.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(token) = token else {
        return unauthorized("Missing or invalid Authorization header");
    };

    match state.sessions.get(&token) {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(SessionStoreError::Expired) => {
            state.sessions.delete(&token);
            unauthorized("Session expired")
        }
        Err(SessionStoreError::NotFound) => unauthorized("Invalid or expired token"),
    }
}

/// Log method, path, status, and duration for every request.
pub async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Render a handler panic as the internal_error envelope.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(
            error_codes::INTERNAL_ERROR,
            "Internal server error",
        )),
    )
        .into_response()
}
