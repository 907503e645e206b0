use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "arena.db";

/// Process settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("ARENA_HOST").unwrap_or_else(|| DEFAULT_HOST.into());
        let port = match lookup("ARENA_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("ARENA_PORT is not a port number: '{}'", raw))?,
            None => DEFAULT_PORT,
        };
        let db_path = lookup("ARENA_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into());

        Ok(Self {
            host,
            port,
            db_path: PathBuf::from(db_path),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
