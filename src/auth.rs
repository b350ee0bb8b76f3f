use actix_web::{http::header::HeaderValue, HttpRequest};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::schemas::IdentityId;

type HmacSha256 = Hmac<Sha256>;

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    /// Telegram user id, stable across username changes.
    pub id: IdentityId,
    /// Not every Telegram account has a username.
    pub username: Option<String>,
}

/// Payload produced by the Telegram Login Widget, sent as the `Authorization` header.
#[derive(Deserialize, Debug, Clone)]
struct TelegramAuthData {
    #[serde(deserialize_with = "number_or_string")]
    auth_date: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    id: i64,
    photo_url: Option<String>,
    username: Option<String>,
    hash: String,
}

/// The widget sends `id` and `auth_date` as numbers, some clients forward them as strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Identity provider that verifies Telegram login payloads against the bot token.
#[derive(Clone)]
pub struct TelegramAuth {
    bot_token: String,
    max_age: Option<Duration>,
}

impl TelegramAuth {
    pub fn new(bot_token: impl Into<String>, max_age: Option<Duration>) -> Self {
        TelegramAuth {
            bot_token: bot_token.into(),
            max_age,
        }
    }

    /// Returns the caller, or `None` when the request is not properly signed.
    pub fn current_user(&self, request: &HttpRequest) -> Option<Identity> {
        let authorization = request
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .map(HeaderValue::to_str)?
            .ok()?;
        let auth_data: TelegramAuthData = match serde_json::from_str(authorization) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "malformed authorization payload");
                return None;
            }
        };
        let hash = hex::decode(&auth_data.hash).ok()?;

        if !self.verify(&auth_data, &hash) {
            warn!(user = auth_data.id, "authorization hash mismatch");
            return None;
        }
        if self.is_expired(&auth_data) {
            warn!(user = auth_data.id, "authorization payload expired");
            return None;
        }
        Some(Identity {
            id: auth_data.id.to_string(),
            username: auth_data.username,
        })
    }

    fn is_expired(&self, auth_data: &TelegramAuthData) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        Utc::now().timestamp() - auth_data.auth_date > max_age.num_seconds()
    }

    fn verify(&self, auth_data: &TelegramAuthData, hash: &[u8]) -> bool {
        self.mac(auth_data).verify_slice(hash).is_ok()
    }

    fn mac(&self, auth_data: &TelegramAuthData) -> HmacSha256 {
        let mut sha256_hasher = Sha256::new();
        sha256_hasher.update(self.bot_token.as_bytes());
        let bot_hash = sha256_hasher.finalize();

        let mut hmac_hasher =
            HmacSha256::new_from_slice(&bot_hash).expect("HMAC can take a key of any size");
        hmac_hasher.update(data_check_string(auth_data).as_bytes());
        hmac_hasher
    }
}

/// Present fields as `key=value`, sorted by key, one per line.
fn data_check_string(auth_data: &TelegramAuthData) -> String {
    let auth_data = auth_data.clone();
    vec![
        ("auth_date", Some(auth_data.auth_date.to_string())),
        ("first_name", auth_data.first_name),
        ("id", Some(auth_data.id.to_string())),
        ("last_name", auth_data.last_name),
        ("photo_url", auth_data.photo_url),
        ("username", auth_data.username),
    ]
    .into_iter()
    .filter_map(|pair| pair.1.map(|val| format!("{}={}", pair.0, val)))
    .collect::<Vec<_>>()
    .join("\n")
}
