use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::security::Actor;

/// Clock skew tolerated on `exp`
pub const TOKEN_LEEWAY_SECS: u64 = 60;

/// Bearer token payload. `sid` ties every request to one console session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    /// Claims for a brand new session
    pub fn new(username: impl Into<String>, role: impl Into<String>, expiry_hours: u64, now: DateTime<Utc>) -> Self {
        let exp = i64::try_from(expiry_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            sub: username.into(),
            role: role.into(),
            sid: Uuid::new_v4().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Last instant at which a token carrying these claims still validates
    pub fn accepted_until(&self) -> DateTime<Utc> {
        self.exp
            .checked_add(TOKEN_LEEWAY_SECS as i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            username: self.sub.clone(),
            role: self.role.clone(),
            session_id: self.sid.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("JWT secret not configured")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.leeway = TOKEN_LEEWAY_SECS;
    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_actor() {
        let claims = Claims::new("ann", "editor", 1, Utc::now());
        let token = generate_jwt(&claims, "s3cret").unwrap();
        let decoded = validate_jwt(&token, "s3cret").unwrap();
        assert_eq!(decoded.actor(), claims.actor());
    }

    #[test]
    fn wrong_secret_and_expiry_are_rejected() {
        let claims = Claims::new("ann", "editor", 1, Utc::now());
        let token = generate_jwt(&claims, "s3cret").unwrap();
        assert!(matches!(validate_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));

        let stale = Claims::new("ann", "editor", 1, Utc::now() - Duration::hours(3));
        let token = generate_jwt(&stale, "s3cret").unwrap();
        assert!(validate_jwt(&token, "s3cret").is_err());
    }

    #[test]
    fn acceptance_window_includes_leeway() {
        let now = Utc::now();
        let claims = Claims::new("ann", "viewer", 1, now);
        assert_eq!(
            claims.accepted_until().timestamp(),
            (now + Duration::hours(1)).timestamp() + TOKEN_LEEWAY_SECS as i64
        );
    }

    #[test]
    fn absurd_expiry_saturates() {
        let claims = Claims::new("ann", "viewer", u64::MAX, Utc::now());
        assert_eq!(claims.exp, DateTime::<Utc>::MAX_UTC.timestamp());
    }

    #[test]
    fn empty_secret_is_refused() {
        let claims = Claims::new("ann", "viewer", 1, Utc::now());
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
    }
}
