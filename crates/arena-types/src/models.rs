use serde::{Deserialize, Serialize};

/// Account record as persisted under `user:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    pub username: String,
    pub password_hash: String,
}

impl Account {
    pub fn profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            name: self.name.clone(),
            surname: self.surname.clone(),
            username: self.username.clone(),
        }
    }
}

/// The part of an account that is safe to hand to other players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: i64,
    pub name: String,
    pub surname: String,
    pub username: String,
}
