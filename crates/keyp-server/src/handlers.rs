//! Route handlers for the HTTP API

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use tracing::warn;

use keyp_core::error::VaultError;
use keyp_core::handle::VaultHandle;
use keyp_core::store::SearchOptions;

use crate::server::AppState;
use crate::sessions::Session;
use crate::types::{
    error_codes, fields_from_inputs, ApiResponse, CreateSecretRequest, HealthResponse,
    RefreshResponse, SecretDetail, SecretSummary, UnlockRequest, UnlockResponse,
    UpdateSecretRequest, VersionResponse,
};

fn ok(data: impl serde::Serialize) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error(error_codes::BAD_REQUEST, message)),
    )
        .into_response()
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::error(error_codes::UNAUTHORIZED, message)),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(error_codes::INTERNAL_ERROR, message)),
    )
        .into_response()
}

/// Translate a core error into status plus envelope. Messages carry no
/// schema or key material; internals are reduced to a generic line.
fn error_response(err: VaultError) -> Response {
    let (status, code, message) = match &err {
        VaultError::NotFound(what) => (
            StatusCode::NOT_FOUND,
            error_codes::NOT_FOUND,
            format!("{what} not found"),
        ),
        VaultError::AlreadyExists(what) => (
            StatusCode::CONFLICT,
            error_codes::CONFLICT,
            format!("{what} already exists"),
        ),
        VaultError::InvalidPassphrase => (
            StatusCode::UNAUTHORIZED,
            error_codes::UNAUTHORIZED,
            "invalid passphrase".to_string(),
        ),
        VaultError::Locked => (
            StatusCode::UNAUTHORIZED,
            error_codes::UNAUTHORIZED,
            "vault is locked".to_string(),
        ),
        VaultError::BadRequest(message) => (
            StatusCode::BAD_REQUEST,
            error_codes::BAD_REQUEST,
            message.clone(),
        ),
        VaultError::Database(_) | VaultError::Crypto(_) | VaultError::Io(_) => {
            warn!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "internal error".to_string(),
            )
        }
    };

    (status, Json(ApiResponse::error(code, &message))).into_response()
}

// Public endpoints

pub async fn health() -> Response {
    ok(HealthResponse { status: "ok" })
}

pub async fn version() -> Response {
    ok(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

// Auth endpoints

/// Unlock the vault and mint a session token.
///
/// Key derivation is CPU-bound and deliberately slow, so it runs on the
/// blocking pool, never on the async executor and never under a lock.
pub async fn unlock(
    State(state): State<AppState>,
    payload: Result<Json<UnlockRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_request("invalid JSON body");
    };

    let handle = Arc::new(VaultHandle::new(state.vault_path.clone()));
    let unlock_result = {
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || handle.unlock(&req.password, Duration::ZERO)).await
    };

    match unlock_result {
        Ok(Ok(())) => {
            let session = state.sessions.create(handle, state.session_timeout);
            ok(UnlockResponse {
                token: session.token,
                expires_at: session.expires_at,
            })
        }
        Ok(Err(err)) => error_response(err),
        Err(_) => internal_error("unlock task failed"),
    }
}

/// Lock the vault and invalidate the session.
pub async fn lock(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    session.handle.lock();
    state.sessions.delete(&session.token);
    (StatusCode::OK, Json(ApiResponse::success_empty())).into_response()
}

/// Extend the session's expiry by the configured timeout.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    match state
        .sessions
        .refresh(&session.token, state.session_timeout)
    {
        Ok(expires_at) => ok(RefreshResponse { expires_at }),
        Err(_) => unauthorized("Invalid or expired token"),
    }
}

// Secret endpoints

pub async fn list_secrets(Extension(session): Extension<Session>) -> Response {
    match session
        .handle
        .with_vault(|vault| vault.list(&SearchOptions::default()))
    {
        Ok(secrets) => {
            let items: Vec<SecretSummary> = secrets.iter().map(SecretSummary::from).collect();
            ok(items)
        }
        Err(err) => error_response(err),
    }
}

pub async fn create_secret(
    Extension(session): Extension<Session>,
    payload: Result<Json<CreateSecretRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_request("invalid JSON body");
    };
    if req.name.trim().is_empty() {
        return bad_request("name is required");
    }
    if req.fields.is_empty() {
        return bad_request("at least one field is required");
    }

    let secret = req.into_secret();
    match session.handle.with_vault(|vault| vault.create(&secret)) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(SecretDetail::from_secret(
                &secret, true,
            ))),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn get_secret(
    Extension(session): Extension<Session>,
    Path(name): Path<String>,
) -> Response {
    match session.handle.with_vault(|vault| vault.get_by_name(&name)) {
        Ok(secret) => ok(SecretDetail::from_secret(&secret, true)),
        Err(err) => error_response(err),
    }
}

/// Partial update: absent members are left unchanged; a supplied `fields`
/// array replaces the record's fields.
pub async fn update_secret(
    Extension(session): Extension<Session>,
    Path(name): Path<String>,
    payload: Result<Json<UpdateSecretRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return bad_request("invalid JSON body");
    };

    let result = session.handle.with_vault(|vault| {
        let mut secret = vault.get_by_name(&name)?;
        if let Some(tags) = req.tags {
            secret.tags = tags;
        }
        if let Some(notes) = req.notes {
            secret.notes = notes;
        }
        if let Some(fields) = req.fields {
            secret.fields = fields_from_inputs(fields);
        }
        vault.update(&mut secret)?;
        Ok(secret)
    });

    match result {
        Ok(secret) => ok(SecretDetail::from_secret(&secret, true)),
        Err(err) => error_response(err),
    }
}

pub async fn delete_secret(
    Extension(session): Extension<Session>,
    Path(name): Path<String>,
) -> Response {
    match session.handle.with_vault(|vault| vault.delete(&name)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

pub async fn search(
    Extension(session): Extension<Session>,
    Query(params): Query<SearchParams>,
) -> Response {
    let Some(query) = params.q.filter(|q| !q.is_empty()) else {
        return bad_request("Query parameter 'q' is required");
    };

    match session
        .handle
        .with_vault(|vault| vault.search(&query, &SearchOptions::default()))
    {
        Ok(secrets) => {
            let items: Vec<SecretSummary> = secrets.iter().map(SecretSummary::from).collect();
            ok(items)
        }
        Err(err) => error_response(err),
    }
}
