use std::env;

use chrono::Duration;
use thiserror::Error;

use crate::schemas::{Member, Roster, RosterError};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("invalid roster: {0}")]
    Roster(#[from] RosterError),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub roster: Roster,
    /// No URI means the in-memory store.
    pub mongodb_uri: Option<String>,
    pub database: String,
    pub bind_address: String,
    pub port: u16,
    pub auth_max_age: Option<Duration>,
    /// Interval of the comment frames that keep idle event streams open.
    pub feed_keep_alive: std::time::Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let port = match lookup("PORT") {
            Some(port) => port.parse().map_err(|err: std::num::ParseIntError| ConfigError::Invalid {
                name: "PORT",
                reason: err.to_string(),
            })?,
            None => 8080,
        };
        let auth_max_age = match lookup("AUTH_MAX_AGE_SECS") {
            Some(secs) => secs.parse::<i64>().map_err(|err| ConfigError::Invalid {
                name: "AUTH_MAX_AGE_SECS",
                reason: err.to_string(),
            })?,
            None => 24 * 60 * 60,
        };
        let feed_keep_alive = match lookup("SSE_KEEP_ALIVE_SECS") {
            Some(secs) => match secs.parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        name: "SSE_KEEP_ALIVE_SECS",
                        reason: "must be at least one second".to_string(),
                    })
                }
                Ok(secs) => secs,
                Err(err) => {
                    return Err(ConfigError::Invalid {
                        name: "SSE_KEEP_ALIVE_SECS",
                        reason: err.to_string(),
                    })
                }
            },
            None => 15,
        };

        Ok(Config {
            bot_token: required("BOT_API_TOKEN")?,
            roster: parse_roster(&required("ROSTER")?)?,
            mongodb_uri: lookup("MONGODB_URI").filter(|uri| !uri.is_empty()),
            database: lookup("MONGODB_DATABASE").unwrap_or_else(|| "GroupSplit".to_string()),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            auth_max_age: (auth_max_age > 0).then(|| Duration::seconds(auth_max_age)),
            feed_keep_alive: std::time::Duration::from_secs(feed_keep_alive),
        })
    }
}

/// Parses `id:Name,id:Name`. A bare `id` uses the id as the name.
pub fn parse_roster(raw: &str) -> Result<Roster, ConfigError> {
    let members = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, name)) => Member::new(id.trim(), name.trim()),
            None => Member::new(entry, entry),
        })
        .collect();
    Ok(Roster::new(members)?)
}
