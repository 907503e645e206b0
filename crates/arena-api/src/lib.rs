pub mod accounts;
pub mod auth;
pub mod error;
pub mod friends;
pub mod leaderboard;
pub mod middleware;
pub mod paging;
pub mod routes;
pub mod simulation;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use arena_db::Database;
    use arena_db::clock::ManualClock;
    use arena_types::models::Account;

    pub fn db() -> Database {
        db_with_clock().0
    }

    pub fn db_with_clock() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let db = Database::open_in_memory(clock.clone()).unwrap();
        (db, clock)
    }

    /// Store an account without paying for a password hash.
    pub fn seed_account(db: &Database, username: &str) -> i64 {
        let id = crate::accounts::allocate_id(db).unwrap();
        let account = Account {
            id,
            name: String::new(),
            surname: String::new(),
            username: username.to_string(),
            password_hash: "unused".to_string(),
        };
        crate::accounts::insert(db, &account).unwrap();
        id
    }
}
