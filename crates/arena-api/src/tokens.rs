//! Opaque bearer tokens.
//!
//! A token is 32 random bytes, base64url encoded, stored under `token:<value>`
//! with the owning account id as its value and a 24 hour expiry. There is no
//! revocation and no refresh; logging in again is the only way to get a fresh
//! session. A stale token is indistinguishable from a forged one.

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use rand_core::{OsRng, RngCore};

use arena_db::{Database, keys};

use crate::error::{ApiError, ApiResult};

pub const TOKEN_TTL_HOURS: i64 = 24;

const TOKEN_BYTES: usize = 32;

/// Mint a new token for `account_id`. Existing tokens of the account stay valid.
pub fn issue(db: &Database, account_id: i64) -> ApiResult<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let token = B64.encode(bytes);

    db.set_with_ttl(
        &keys::token(&token),
        &account_id.to_string(),
        chrono::Duration::hours(TOKEN_TTL_HOURS),
    )
    .context("storing token")?;

    Ok(token)
}

/// Map a presented credential back to its account. Accepts the raw token or
/// an `Authorization` value carrying the `Bearer ` scheme.
pub fn resolve(db: &Database, presented: &str) -> ApiResult<i64> {
    let token = strip_bearer(presented);
    if token.is_empty() || !token.bytes().all(is_token_byte) {
        return Err(ApiError::Unauthenticated);
    }

    let owner = db.get(&keys::token(token)).context("reading token")?;
    owner
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or(ApiError::Unauthenticated)
}

pub fn strip_bearer(header: &str) -> &str {
    let header = header.trim();
    header.strip_prefix("Bearer ").map(str::trim).unwrap_or(header)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
