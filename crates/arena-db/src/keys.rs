//! Key layout. Every key the service writes is built here.

pub const USER_PREFIX: &str = "user:";
pub const USERNAME_PREFIX: &str = "username:";
pub const TOKEN_PREFIX: &str = "token:";
pub const FRIEND_REQUEST_PREFIX: &str = "friendrequest:";
pub const FRIENDS_PREFIX: &str = "friends:";

/// Counter producing sequential account ids.
pub const NEXT_USER_ID: &str = "next_user_id";

/// The single global ranked set.
pub const LEADERBOARD: &str = "leaderboard";

pub fn user(id: i64) -> String {
    format!("{USER_PREFIX}{id}")
}

pub fn username(name: &str) -> String {
    format!("{USERNAME_PREFIX}{name}")
}

pub fn token(value: &str) -> String {
    format!("{TOKEN_PREFIX}{value}")
}

/// Pending inbound friend requests of `id`, scored by send time.
pub fn friend_requests(id: i64) -> String {
    format!("{FRIEND_REQUEST_PREFIX}{id}")
}

/// Friends of `id`, scored by acceptance time.
pub fn friends(id: i64) -> String {
    format!("{FRIENDS_PREFIX}{id}")
}
