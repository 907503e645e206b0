//! Test-data generator: registers a batch of players and plays a full round
//! robin between them, settling every match through the leaderboard.

use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
};
use rand::Rng;
use tracing::{info, warn};

use arena_db::Database;
use arena_types::api::{Envelope, MatchResultRequest, SimulationQuery, SimulationReport};
use arena_types::models::Account;

use crate::accounts;
use crate::auth::{AppState, run_blocking};
use crate::error::{ApiError, ApiResult};
use crate::leaderboard;
use crate::middleware::Caller;

pub const MAX_PLAYERS: i64 = 100;

/// Password given to every generated player.
pub const PLAYER_PASSWORD: &str = "password";

const FIRST_NAMES: &[&str] = &["Alex", "Blair", "Casey", "Drew", "Emery", "Finley"];
const LAST_NAMES: &[&str] = &["Archer", "Brooks", "Carter", "Dalton", "Ellis", "Foster"];

/// Create `player_count` fresh accounts named `player_<id>`. Ids whose
/// name is already taken are skipped.
pub fn create_players(db: &Database, player_count: i64) -> ApiResult<Vec<Account>> {
    let password_hash = accounts::hash_password(PLAYER_PASSWORD)?;
    let mut rng = rand::rng();

    let mut players = Vec::with_capacity(player_count as usize);
    while (players.len() as i64) < player_count {
        let id = accounts::allocate_id(db)?;
        let account = Account {
            id,
            name: FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())].to_string(),
            surname: LAST_NAMES[rng.random_range(0..LAST_NAMES.len())].to_string(),
            username: format!("player_{}", id),
            password_hash: password_hash.clone(),
        };

        // Someone may already have registered this name; move on to the next id.
        match accounts::insert(db, &account) {
            Ok(()) => players.push(account),
            Err(ApiError::Conflict(_)) => {
                warn!("Username '{}' already taken, skipping id {}", account.username, id);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(players)
}

/// Every pair of players meets once with random scores in `0..5`.
pub fn play_round_robin(db: &Database, players: &[Account]) -> ApiResult<Vec<MatchResultRequest>> {
    let mut rng = rand::rng();
    let mut matches = Vec::new();

    for (i, first) in players.iter().enumerate() {
        for second in &players[i + 1..] {
            let result = MatchResultRequest {
                userid1: first.id,
                userid2: second.id,
                score1: rng.random_range(0..5),
                score2: rng.random_range(0..5),
            };
            leaderboard::settle_match(db, &result)?;
            matches.push(result);
        }
    }

    Ok(matches)
}

pub fn simulate(db: &Database, player_count: i64) -> ApiResult<Vec<MatchResultRequest>> {
    let players = create_players(db, player_count)?;
    let matches = play_round_robin(db, &players)?;
    info!("Simulated {} matches between {} players", matches.len(), players.len());
    Ok(matches)
}

/// GET /simulation?usercount=
pub async fn run_simulation(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    query: Result<Query<SimulationQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<SimulationReport>>> {
    let Query(query) = query?;
    let player_count = query
        .usercount
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|n| (1..=MAX_PLAYERS).contains(n))
        .ok_or_else(|| ApiError::InvalidArgument("Invalid user count".into()))?;

    let matches = run_blocking(&state, move |db| simulate(db, player_count)).await?;
    Ok(Json(Envelope::ok(SimulationReport {
        matches,
        message: "Simulation completed successfully".into(),
    })))
}
