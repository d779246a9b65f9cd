use chrono::{DateTime, Duration, Utc};
use rand::Rng;

const TOKEN_LENGTH: usize = 48;

/// Per-session anti-forgery secret with an absolute expiry
#[derive(Debug, Clone)]
pub struct CsrfToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CsrfToken {
    pub fn generate(now: DateTime<Utc>, ttl: Duration) -> Self {
        let value: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn verify(&self, presented: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && constant_time_eq(self.value.as_bytes(), presented.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
