//! Global leaderboard: one sorted set of account id -> cumulative score.
//!
//! Scores only ever move through the store's atomic increment, so concurrent
//! match results never lose points. Rank is computed at read time from
//! descending score. Accounts with equal scores have no guaranteed order.

use std::cmp::Ordering;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
};
use tracing::{error, info, warn};

use arena_db::{Database, keys};
use arena_types::api::{Envelope, LeaderboardEntry, MatchResultRequest, PageQuery};

use crate::accounts;
use crate::auth::{AppState, run_blocking};
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::paging::Page;

pub const WIN_POINTS: i64 = 3;
pub const DRAW_POINTS: i64 = 1;
pub const LOSS_POINTS: i64 = 0;

/// Shown in place of a username when the ranked account no longer exists.
pub const UNKNOWN_USERNAME: &str = "unknown";

/// Add `delta` to the account's score, creating the entry if needed.
/// Returns the new cumulative score.
pub fn add_score(db: &Database, account_id: i64, delta: f64) -> ApiResult<f64> {
    Ok(db
        .zincrby(keys::LEADERBOARD, &account_id.to_string(), delta)
        .with_context(|| format!("adding {} points to {}", delta, account_id))?)
}

/// Points awarded to each side for raw scores `score1` and `score2`.
pub fn match_points(score1: i64, score2: i64) -> (i64, i64) {
    match score1.cmp(&score2) {
        Ordering::Greater => (WIN_POINTS, LOSS_POINTS),
        Ordering::Less => (LOSS_POINTS, WIN_POINTS),
        Ordering::Equal => (DRAW_POINTS, DRAW_POINTS),
    }
}

/// Award both participants their points, one increment each.
pub fn settle_match(db: &Database, result: &MatchResultRequest) -> ApiResult<()> {
    let (points1, points2) = match_points(result.score1, result.score2);

    add_score(db, result.userid1, points1 as f64)?;
    if let Err(e) = add_score(db, result.userid2, points2 as f64) {
        error!(
            "Match {} vs {}: {} points applied to {} but not to {}; needs reconciliation",
            result.userid1, result.userid2, points1, result.userid1, result.userid2
        );
        return Err(e);
    }

    info!(
        "Match {} ({}) vs {} ({}): +{} / +{}",
        result.userid1, result.score1, result.userid2, result.score2, points1, points2
    );
    Ok(())
}

/// Check the participants, then settle.
pub fn record_match(db: &Database, result: &MatchResultRequest) -> ApiResult<()> {
    if result.userid1 == result.userid2 {
        return Err(ApiError::InvalidArgument("A match needs two different players".into()));
    }

    for id in [result.userid1, result.userid2] {
        if !db.exists(&keys::user(id)).context("checking match participant")? {
            return Err(ApiError::NotFound(format!("User {} not found", id)));
        }
    }

    settle_match(db, result)
}

pub fn get_page(db: &Database, page: Page) -> ApiResult<Vec<LeaderboardEntry>> {
    let start = page.offset();
    let ranked = db
        .zrevrange_with_scores(keys::LEADERBOARD, start, page.count)
        .context("reading leaderboard")?;

    let mut entries = Vec::with_capacity(ranked.len());
    for (i, entry) in ranked.into_iter().enumerate() {
        let id: i64 = entry
            .member
            .parse()
            .with_context(|| format!("Malformed leaderboard member '{}'", entry.member))?;

        let username = match accounts::load(db, id)? {
            Some(account) => account.username,
            None => {
                warn!("Leaderboard entry {} has no account", id);
                UNKNOWN_USERNAME.to_string()
            }
        };

        entries.push(LeaderboardEntry {
            id,
            username,
            rank: start + i as i64 + 1,
            score: entry.score,
        });
    }

    Ok(entries)
}

// -- Handlers --

/// POST /matchresult
pub async fn record_match_result(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    body: Result<Json<MatchResultRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<bool>>> {
    let Json(result) = body?;
    run_blocking(&state, move |db| record_match(db, &result)).await?;
    Ok(Json(Envelope::ok(true)))
}

/// GET /leaderboard?page=&count=
pub async fn leaderboard_page(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<Vec<LeaderboardEntry>>>> {
    let page = match query {
        Ok(Query(query)) => Page::lenient(&query),
        Err(_) => Page::lenient(&PageQuery::default()),
    };
    let entries = run_blocking(&state, move |db| get_page(db, page)).await?;
    Ok(Json(Envelope::ok(entries)))
}
