//! Session issuance and the session cache interface.
//!
//! Tokens are 32 random bytes, URL-safe base64 encoded for transport and
//! SHA-256 hashed before being handed to `SessionRepo` — only the hash is
//! ever persisted, mirroring how `Crypter` never stores a plaintext secret.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

const TOKEN_LEN: usize = 32;
pub const SESSION_LIFETIME_HOURS: i64 = 48;

#[derive(Debug, Clone)]
pub struct Session {
    /// SHA-256 hash of the issued token, hex-encoded. Never the token itself.
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A freshly issued session: the caller gets the bearer token exactly
/// once, the repo only ever sees its hash.
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Generates a new bearer token and its corresponding `Session` row, valid
/// for [`SESSION_LIFETIME_HOURS`] from `now`.
pub fn issue(user_id: Uuid, now: DateTime<Utc>) -> IssuedSession {
    let mut raw = [0u8; TOKEN_LEN];
    rand::rng().fill_bytes(&mut raw);
    let token = URL_SAFE_NO_PAD.encode(raw);
    let session = Session {
        token_hash: hash_token(&token),
        user_id,
        expires_at: now + Duration::hours(SESSION_LIFETIME_HOURS),
    };
    IssuedSession { token, session }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn create(&self, session: Session) -> crate::Result<()>;
    async fn get(&self, token_hash: &str) -> crate::Result<Session>;
    async fn delete(&self, token_hash: &str) -> crate::Result<()>;
    /// Removes every session whose `expires_at` is at or before `now`,
    /// returning the count removed. Driven by the periodic sweeper task.
    async fn delete_expired(&self, now: DateTime<Utc>) -> crate::Result<u64>;
}

#[derive(Default)]
pub struct InMemorySessionRepo {
    sessions: tokio::sync::RwLock<std::collections::HashMap<String, Session>>,
}

impl InMemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepo for InMemorySessionRepo {
    async fn create(&self, session: Session) -> crate::Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> crate::Result<Session> {
        self.sessions
            .read()
            .await
            .get(token_hash)
            .cloned()
            .ok_or_else(|| AppError::unauthorized("session not found or expired").into())
    }

    async fn delete(&self, token_hash: &str) -> crate::Result<()> {
        self.sessions.write().await.remove(token_hash);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> crate::Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_hashes_to_the_stored_hash() {
        let issued = issue(Uuid::new_v4(), Utc::now());
        assert_eq!(hash_token(&issued.token), issued.session.token_hash);
    }

    #[test]
    fn two_issuances_never_collide() {
        let now = Utc::now();
        let a = issue(Uuid::new_v4(), now);
        let b = issue(Uuid::new_v4(), now);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn session_expires_after_lifetime() {
        let now = Utc::now();
        let issued = issue(Uuid::new_v4(), now);
        assert!(!issued.session.is_expired(now));
        assert!(issued
            .session
            .is_expired(now + Duration::hours(SESSION_LIFETIME_HOURS + 1)));
    }

    #[tokio::test]
    async fn sweeper_removes_only_expired_sessions() {
        let repo = InMemorySessionRepo::new();
        let now = Utc::now();
        let fresh = issue(Uuid::new_v4(), now);
        let stale = Session {
            expires_at: now - Duration::hours(1),
            ..issue(Uuid::new_v4(), now).session
        };
        repo.create(fresh.session.clone()).await.unwrap();
        repo.create(stale.clone()).await.unwrap();

        let removed = repo.delete_expired(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(&fresh.session.token_hash).await.is_ok());
        assert!(repo.get(&stale.token_hash).await.is_err());
    }
}
