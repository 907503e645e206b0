use serde::{Deserialize, Deserializer, Serialize, de};

use crate::models::PublicProfile;

// -- Envelope --

/// Every response body, success or failure, is wrapped in this envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: bool,
    pub result: Option<T>,
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status: true,
            result: Some(result),
            message: String::new(),
        }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: false,
            result: None,
            message: message.into(),
        }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: PublicProfile,
    pub token: String,
}

// -- Accounts --

/// Profile patch. `name`, `surname` and `username` always overwrite the
/// stored values, even when empty; `password` is only applied when non-empty.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountDetailsQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub username: Option<String>,
}

// -- Paging --

/// Raw paging parameters. Kept as strings so each endpoint can decide how
/// strictly to treat missing or non-numeric input.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub count: Option<String>,
}

// -- Friendship --

#[derive(Debug, Deserialize)]
pub struct SendFriendRequest {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub userid: i64,
}

#[derive(Debug, Deserialize)]
pub struct RespondFriendRequest {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub requester_id: i64,
    pub status: String,
}

/// Friendship bodies have always carried ids as JSON strings; numbers are
/// accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match WireId::deserialize(deserializer)? {
        WireId::Number(id) => Ok(id),
        WireId::Text(raw) => raw
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid account id '{}'", raw))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequestDetails {
    pub user_id: i64,
    pub username: String,
    pub date: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendDetails {
    pub user_id: i64,
    pub username: String,
}

// -- Matches --

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchResultRequest {
    pub userid1: i64,
    pub userid2: i64,
    pub score1: i64,
    pub score2: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: i64,
    pub username: String,
    pub rank: i64,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct SimulationQuery {
    pub usercount: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationReport {
    pub matches: Vec<MatchResultRequest>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendship_ids_accept_strings_and_numbers() {
        let quoted: SendFriendRequest = serde_json::from_str(r#"{"userid":"42"}"#).unwrap();
        let bare: SendFriendRequest = serde_json::from_str(r#"{"userid":42}"#).unwrap();
        assert_eq!(quoted.userid, 42);
        assert_eq!(bare.userid, 42);

        let respond: RespondFriendRequest =
            serde_json::from_str(r#"{"requester_id":"7","status":"accept"}"#).unwrap();
        assert_eq!(respond.requester_id, 7);
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        assert!(serde_json::from_str::<SendFriendRequest>(r#"{"userid":"seven"}"#).is_err());
        assert!(serde_json::from_str::<SendFriendRequest>(r#"{"userid":true}"#).is_err());
    }
}
