//! Credential exchange for the registry API.
//!
//! Operators are configured with a SHA-256 hash of their password. A
//! successful exchange issues a random 32-byte bearer token (hex) that is
//! valid for `ttl` (zero means it never expires).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Live tokens kept per manager; the oldest is evicted past this.
pub const MAX_ISSUED_TOKENS: usize = 1024;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OperatorCredential {
    pub username: String,
    /// Hex-encoded SHA-256 of the password.
    pub password_sha256: String,
}

impl OperatorCredential {
    pub fn from_password(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password_sha256: hash_password(password),
        }
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Clone, Debug)]
struct IssuedToken {
    username: String,
    issued_at: DateTime<Utc>,
}

pub struct TokenManager {
    operators: HashMap<String, [u8; 32]>,
    ttl: Duration,
    issued: Mutex<HashMap<String, IssuedToken>>,
}

impl TokenManager {
    pub fn new(operators: &[OperatorCredential], ttl: std::time::Duration) -> Result<Self> {
        let mut table = HashMap::new();
        for op in operators {
            if op.username.trim().is_empty() {
                return Err(anyhow!("operator username must not be empty"));
            }
            let hash = parse_hex32(&op.password_sha256).map_err(|e| {
                anyhow!("operator '{}' has an invalid password_sha256: {}", op.username, e)
            })?;
            table.insert(op.username.clone(), hash);
        }
        Ok(Self {
            operators: table,
            ttl: Duration::from_std(ttl).map_err(|_| anyhow!("token ttl out of range"))?,
            issued: Mutex::new(HashMap::new()),
        })
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Exchange credentials for a bearer token. `None` means the credentials were rejected.
    pub fn exchange(&self, username: &str, password: &str, now: DateTime<Utc>) -> Option<String> {
        let expected = self.operators.get(username)?;
        let presented: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        if !constant_time_eq(expected, &presented) {
            return None;
        }
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let mut issued = self.issued.lock().ok()?;
        self.prune(&mut issued, now);
        issued.insert(
            token.clone(),
            IssuedToken {
                username: username.to_string(),
                issued_at: now,
            },
        );
        Some(token)
    }

    /// Returns the operator the token was issued to.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        let issued = self
            .issued
            .lock()
            .map_err(|_| anyhow!("token table lock poisoned"))?;
        let entry = issued
            .get(token)
            .ok_or_else(|| anyhow!("bearer token invalid"))?;
        if self.is_expired(entry, now) {
            return Err(anyhow!("bearer token expired"));
        }
        Ok(entry.username.clone())
    }

    fn is_expired(&self, entry: &IssuedToken, now: DateTime<Utc>) -> bool {
        !self.ttl.is_zero() && now.signed_duration_since(entry.issued_at) > self.ttl
    }

    /// Drops expired tokens and makes room for one more.
    fn prune(&self, issued: &mut HashMap<String, IssuedToken>, now: DateTime<Utc>) {
        if !self.ttl.is_zero() {
            let ttl = self.ttl;
            issued.retain(|_, entry| now.signed_duration_since(entry.issued_at) <= ttl);
        }
        while issued.len() >= MAX_ISSUED_TOKENS {
            let oldest = issued
                .iter()
                .min_by_key(|(_, entry)| entry.issued_at)
                .map(|(token, _)| token.clone());
            match oldest {
                Some(token) => {
                    issued.remove(&token);
                }
                None => break,
            }
        }
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|issued| issued.len()).unwrap_or(0)
    }
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value.trim())?;
    if bytes.len() != 32 {
        return Err(anyhow!("expected 32 bytes, got {}", bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl_secs: u64) -> TokenManager {
        TokenManager::new(
            &[OperatorCredential::from_password("edge", "s3cret")],
            std::time::Duration::from_secs(ttl_secs),
        )
        .unwrap()
    }

    #[test]
    fn exchange_issues_token_for_valid_credentials() {
        let mgr = manager(60);
        let now = Utc::now();
        let token = mgr.exchange("edge", "s3cret", now).unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(mgr.validate(&token, now).unwrap(), "edge");
    }

    #[test]
    fn wrong_password_or_user_is_rejected() {
        let mgr = manager(60);
        assert!(mgr.exchange("edge", "guess", Utc::now()).is_none());
        assert!(mgr.exchange("nobody", "s3cret", Utc::now()).is_none());
        assert!(mgr.validate("deadbeef", Utc::now()).is_err());
    }

    #[test]
    fn tokens_expire_after_ttl_unless_ttl_is_zero() {
        let now = Utc::now();
        let mgr = manager(60);
        let token = mgr.exchange("edge", "s3cret", now).unwrap();
        assert!(mgr.validate(&token, now + Duration::seconds(61)).is_err());

        let forever = manager(0);
        let token = forever.exchange("edge", "s3cret", now).unwrap();
        assert!(forever.validate(&token, now + Duration::days(365)).is_ok());
    }

    #[test]
    fn token_table_is_bounded_without_ttl() {
        let mgr = manager(0);
        let start = Utc::now();
        let first = mgr.exchange("edge", "s3cret", start).unwrap();
        let mut last = first.clone();
        for i in 1..=MAX_ISSUED_TOKENS as i64 {
            last = mgr
                .exchange("edge", "s3cret", start + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(mgr.issued_count(), MAX_ISSUED_TOKENS);
        assert!(mgr.validate(&first, start).is_err(), "oldest token evicted");
        assert!(mgr.validate(&last, start).is_ok());
    }

    #[test]
    fn expired_tokens_are_dropped_on_next_exchange() {
        let mgr = manager(60);
        let now = Utc::now();
        mgr.exchange("edge", "s3cret", now).unwrap();
        mgr.exchange("edge", "s3cret", now).unwrap();
        mgr.exchange("edge", "s3cret", now + Duration::seconds(120)).unwrap();
        assert_eq!(mgr.issued_count(), 1);
    }

    #[test]
    fn rejects_malformed_password_hash() {
        let bad = OperatorCredential {
            username: "edge".to_string(),
            password_sha256: "abc".to_string(),
        };
        assert!(TokenManager::new(&[bad], std::time::Duration::from_secs(1)).is_err());
    }
}
