use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, run_blocking};
use crate::error::ApiError;
use crate::tokens;

/// The authenticated account behind the current request.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub account_id: i64,
}

/// Resolve the `Authorization` header to an account and stash it as a
/// request extension. Every failure reads as the same 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?
        .to_string();

    let account_id = run_blocking(&state, move |db| tokens::resolve(db, &presented)).await?;

    req.extensions_mut().insert(Caller { account_id });
    Ok(next.run(req).await)
}
