use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use arena_db::Database;
use arena_types::api::{AuthResponse, Envelope, LoginRequest, RegisterRequest};

use crate::accounts;
use crate::error::{ApiError, ApiResult};
use crate::tokens;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}

/// Run store work off the async runtime. Password hashing and every store
/// round trip go through here.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("worker task failed"))
        })?
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;

    let response = run_blocking(&state, move |db| {
        let account = accounts::register(db, &req)?;
        let token = tokens::issue(db, account.id)?;
        Ok(AuthResponse {
            user: account.profile(),
            token,
        })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(Envelope::ok(response))))
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;

    let response = run_blocking(&state, move |db| {
        let account = accounts::authenticate(db, &req.username, &req.password)?;
        let token = tokens::issue(db, account.id)?;
        info!("Account {} logged in", account.id);
        Ok(AuthResponse {
            user: account.profile(),
            token,
        })
    })
    .await?;

    Ok(Json(Envelope::ok(response)))
}
