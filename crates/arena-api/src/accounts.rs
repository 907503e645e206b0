//! Account directory: `user:<id>` holds the JSON record, `username:<name>`
//! maps a username back to its id.
//!
//! The two keys are written one after the other, not atomically. A record
//! whose username index is missing is repaired the next time the record is
//! loaded by id.

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
};
use tracing::{error, info, warn};

use arena_db::{Database, keys};
use arena_types::api::{
    AccountDetailsQuery, Envelope, RegisterRequest, SearchQuery, UpdateProfileRequest,
};
use arena_types::models::{Account, PublicProfile};

use crate::auth::{AppState, run_blocking};
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn register(db: &Database, req: &RegisterRequest) -> ApiResult<Account> {
    if req.username.is_empty() {
        return Err(ApiError::InvalidArgument("Username is required".into()));
    }
    if req.password.is_empty() {
        return Err(ApiError::InvalidArgument("Password is required".into()));
    }

    if db.exists(&keys::username(&req.username)).context("checking username")? {
        return Err(username_taken());
    }

    let password_hash = hash_password(&req.password)?;
    let account = Account {
        id: allocate_id(db)?,
        name: req.name.clone(),
        surname: req.surname.clone(),
        username: req.username.clone(),
        password_hash,
    };

    insert(db, &account)?;
    info!("Registered account {} ({})", account.id, account.username);
    Ok(account)
}

/// Next sequential account id.
pub(crate) fn allocate_id(db: &Database) -> ApiResult<i64> {
    Ok(db.incr(keys::NEXT_USER_ID).context("allocating account id")?)
}

/// Persist a fresh account: record first, then the username index.
///
/// The index is claimed with set-if-absent, so a registration that raced
/// ahead between our existence check and this write wins and ours is undone.
pub(crate) fn insert(db: &Database, account: &Account) -> ApiResult<()> {
    store(db, account)?;

    match db.set_nx(&keys::username(&account.username), &account.id.to_string()) {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!(
                "Username '{}' was claimed concurrently; dropping account {}",
                account.username, account.id
            );
            db.del(&keys::user(account.id)).context("dropping raced account")?;
            Err(username_taken())
        }
        Err(e) => {
            error!(
                "Account {} stored but its username index '{}' was not; record is orphaned until reloaded: {:#}",
                account.id, account.username, e
            );
            Err(e.into())
        }
    }
}

fn store(db: &Database, account: &Account) -> ApiResult<()> {
    let json = serde_json::to_string(account)?;
    db.set(&keys::user(account.id), &json).context("writing account record")?;
    Ok(())
}

fn username_taken() -> ApiError {
    ApiError::Conflict("Username already exists!".into())
}

pub fn authenticate(db: &Database, username: &str, password: &str) -> ApiResult<Account> {
    let id = find_by_username(db, username)?;
    let account = load(db, id)?.ok_or_else(|| {
        warn!("Username '{}' indexes missing account {}", username, id);
        ApiError::NotFound("User not found!".into())
    })?;

    if !verify_password(password, &account.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    Ok(account)
}

/// Read and decode an account record. `Ok(None)` when the record is absent;
/// an undecodable record is an error.
pub fn load(db: &Database, id: i64) -> ApiResult<Option<Account>> {
    let Some(json) = db.get(&keys::user(id)).context("reading account record")? else {
        return Ok(None);
    };

    let account: Account = serde_json::from_str(&json)
        .with_context(|| format!("Malformed record for account {}", id))?;
    Ok(Some(account))
}

pub fn get(db: &Database, id: i64) -> ApiResult<Account> {
    let account = load(db, id)?.ok_or_else(|| ApiError::NotFound("User not found!".into()))?;
    repair_username_index(db, &account);
    Ok(account)
}

/// Restore the `username:<name>` entry of a record that lost it. Failures
/// are logged and never fail the read that triggered the check.
fn repair_username_index(db: &Database, account: &Account) {
    if account.username.is_empty() {
        return;
    }

    let key = keys::username(&account.username);
    match db.get(&key) {
        Ok(Some(owner)) if owner == account.id.to_string() => {}
        Ok(Some(owner)) => warn!(
            "Username index '{}' points to account {} but account {} claims it",
            account.username, owner, account.id
        ),
        Ok(None) => match db.set_nx(&key, &account.id.to_string()) {
            Ok(true) => warn!(
                "Restored missing username index '{}' for account {}",
                account.username, account.id
            ),
            Ok(false) => {}
            Err(e) => warn!("Could not restore username index '{}': {:#}", account.username, e),
        },
        Err(e) => warn!("Could not check username index '{}': {:#}", account.username, e),
    }
}

pub fn find_by_username(db: &Database, username: &str) -> ApiResult<i64> {
    let id = db
        .get(&keys::username(username))
        .context("reading username index")?
        .ok_or_else(|| ApiError::NotFound("User not found!".into()))?;

    Ok(id
        .parse::<i64>()
        .with_context(|| format!("Malformed username index for '{}'", username))?)
}

/// Apply a profile patch on behalf of `caller`.
///
/// `name`, `surname` and `username` are always overwritten, even with empty
/// strings. A username change moves the index; an empty username leaves the
/// old index in place. The password is only replaced when one is supplied.
pub fn update(db: &Database, caller: i64, patch: &UpdateProfileRequest) -> ApiResult<Account> {
    if patch.id != caller {
        return Err(ApiError::Forbidden("Cannot change another user's information".into()));
    }

    let mut account = get(db, caller)?;

    if !patch.username.is_empty() && patch.username != account.username {
        let new_key = keys::username(&patch.username);
        if !db.set_nx(&new_key, &caller.to_string()).context("claiming username")? {
            let owner = db.get(&new_key).context("reading username index")?;
            if owner != Some(caller.to_string()) {
                return Err(username_taken());
            }
        }

        let old_key = keys::username(&account.username);
        if db.get(&old_key).context("reading old username index")? == Some(caller.to_string()) {
            db.del(&old_key).context("releasing old username")?;
        }
        info!(
            "Account {} renamed from '{}' to '{}'",
            caller, account.username, patch.username
        );
    }

    account.name = patch.name.clone();
    account.surname = patch.surname.clone();
    account.username = patch.username.clone();

    if !patch.password.is_empty() {
        account.password_hash = hash_password(&patch.password)?;
    }

    store(db, &account)?;
    Ok(account)
}

// -- Handlers --

/// POST /update
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<PublicProfile>>> {
    let Json(patch) = body?;
    let account = run_blocking(&state, move |db| update(db, caller.account_id, &patch)).await?;
    Ok(Json(Envelope::ok(account.profile())))
}

/// GET /userdetails?id=
///
/// Served without authentication, like the service always has.
pub async fn account_details(
    State(state): State<AppState>,
    query: Result<Query<AccountDetailsQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<PublicProfile>>> {
    let Query(query) = query?;
    let raw = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("ID is required".into()))?;
    let id: i64 = raw.parse().map_err(|_| ApiError::invalid("id"))?;

    let account = run_blocking(&state, move |db| get(db, id)).await?;
    Ok(Json(Envelope::ok(account.profile())))
}

/// GET /friendship/search?username=
pub async fn search_account(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<i64>>> {
    let Query(query) = query?;
    let username = query
        .username
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("Username is required".into()))?;

    let id = run_blocking(&state, move |db| find_by_username(db, &username)).await?;
    if id == caller.account_id {
        return Err(ApiError::InvalidArgument("You cannot search your own username".into()));
    }

    Ok(Json(Envelope::ok(id)))
}
