//! Short-circuit for OAuth token requests.
//!
//! Clients authenticate before calling any API; any URL ending in
//! `/oauth2/v2.0/token` gets a JWT-shaped payload signed with a constant
//! key so token caches and claim parsing in the client keep working.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

const SIGNING_KEY: &[u8] = b"apibridge-mock-signing-key";
const EXPIRES_IN_SECS: i64 = 86400;

#[derive(Serialize)]
struct Claims {
    oid: String,
    appid: String,
    iat: i64,
    exp: i64,
}

pub fn is_token_request(path: &str) -> bool {
    path.ends_with("/oauth2/v2.0/token")
}

/// The fake token response body.
pub fn token_response() -> Result<Value> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        oid: Uuid::nil().to_string(),
        appid: Uuid::nil().to_string(),
        iat: now,
        exp: now + EXPIRES_IN_SECS,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SIGNING_KEY),
    )?;
    Ok(json!({
        "access_token": token,
        "expires_in": EXPIRES_IN_SECS,
        "ext_expires_in": EXPIRES_IN_SECS,
        "token_type": "Bearer",
    }))
}
