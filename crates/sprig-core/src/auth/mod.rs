//! Owner credentials and editor sessions.
//!
//! The store never holds the admin password itself, only a salted hash;
//! verification happens behind the [`CredentialVerifier`] seam. A successful
//! login yields an [`AuthToken`] scoped to one username — an explicit value
//! handed to the editor at construction, not ambient process state — and
//! logout clears it from the session store.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::store::ProfileStore;
use crate::util::unix_timestamp_ms;

const SALT_LENGTH: usize = 16;

/// Minimum accepted admin password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Hashing and verification of admin passwords
pub trait CredentialVerifier: Send + Sync {
    /// Hash a plaintext password for storage
    fn hash_password(&self, password: &str) -> String;

    /// Check a plaintext password against a stored hash
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Salted SHA-256 verifier; hashes are stored as `salt$hexdigest`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SaltedSha256Verifier;

impl SaltedSha256Verifier {
    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl CredentialVerifier for SaltedSha256Verifier {
    fn hash_password(&self, password: &str) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LENGTH)
            .map(char::from)
            .collect();
        let digest = Self::digest(&salt, password);
        format!("{salt}${digest}")
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let Some((salt, digest)) = stored.split_once('$') else {
            return false;
        };
        Self::digest(salt, password) == digest
    }
}

/// Proof of a successful login, scoped to one username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub username: String,
    /// Unix milliseconds of the successful password check
    pub issued_at: i64,
}

impl AuthToken {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            issued_at: unix_timestamp_ms(),
        }
    }
}

/// Persistence for editor sessions
pub trait SessionStore: Send + Sync {
    /// Load the stored token for a username, if any
    fn load(&self, username: &str) -> Result<Option<AuthToken>>;

    /// Persist a token, replacing any previous one for the same username
    fn save(&self, token: &AuthToken) -> Result<()>;

    /// Remove the stored token for a username
    fn clear(&self, username: &str) -> Result<()>;
}

/// Process-local session store
#[derive(Default)]
pub struct MemorySessionStore {
    tokens: Mutex<HashMap<String, AuthToken>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, username: &str) -> Result<Option<AuthToken>> {
        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(tokens.get(username).cloned())
    }

    fn save(&self, token: &AuthToken) -> Result<()> {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens.insert(token.username.clone(), token.clone());
        Ok(())
    }

    fn clear(&self, username: &str) -> Result<()> {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens.remove(username);
        Ok(())
    }
}

/// Check a password against the stored hash and persist a session token.
///
/// An unknown username is `NotFound`; a wrong password is `InvalidInput`
/// and leaves no session behind.
pub async fn login(
    store: &dyn ProfileStore,
    verifier: &dyn CredentialVerifier,
    sessions: &dyn SessionStore,
    username: &str,
    password: &str,
) -> Result<AuthToken> {
    let profile = store
        .fetch_profile(username)
        .await?
        .ok_or_else(|| Error::NotFound(username.to_string()))?;

    if !verifier.verify(password, &profile.password_hash) {
        return Err(Error::InvalidInput("incorrect password".to_string()));
    }

    let token = AuthToken::new(username);
    sessions.save(&token)?;
    tracing::info!("Editor session opened for {username}");
    Ok(token)
}

/// End the editor session for a username.
pub fn logout(sessions: &dyn SessionStore, username: &str) -> Result<()> {
    sessions.clear(username)?;
    tracing::info!("Editor session closed for {username}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::store::MemoryStore;

    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let verifier = SaltedSha256Verifier;
        let stored = verifier.hash_password("hunter2!");

        assert!(verifier.verify("hunter2!", &stored));
        assert!(!verifier.verify("hunter3!", &stored));
    }

    #[test]
    fn hashes_are_salted() {
        let verifier = SaltedSha256Verifier;
        let first = verifier.hash_password("same password");
        let second = verifier.hash_password("same password");

        assert_ne!(first, second);
        assert!(verifier.verify("same password", &first));
        assert!(verifier.verify("same password", &second));
    }

    #[test]
    fn stored_hash_never_contains_password() {
        let verifier = SaltedSha256Verifier;
        let stored = verifier.hash_password("plaintext-secret");
        assert!(!stored.contains("plaintext-secret"));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        let verifier = SaltedSha256Verifier;
        assert!(!verifier.verify("anything", "no-separator-here"));
        assert!(!verifier.verify("anything", ""));
    }

    #[test]
    fn session_store_is_scoped_per_username() {
        let sessions = MemorySessionStore::new();
        let alice = AuthToken::new("alice");
        let bob = AuthToken::new("bob");
        sessions.save(&alice).unwrap();
        sessions.save(&bob).unwrap();

        sessions.clear("alice").unwrap();
        assert!(sessions.load("alice").unwrap().is_none());
        assert_eq!(sessions.load("bob").unwrap().unwrap().username, "bob");
    }

    #[tokio::test]
    async fn login_issues_and_persists_token() {
        let verifier = SaltedSha256Verifier;
        let store = Arc::new(MemoryStore::new());
        store
            .create_profile("alice", verifier.hash_password("open sesame"))
            .await;
        let sessions = MemorySessionStore::new();

        let token = login(store.as_ref(), &verifier, &sessions, "alice", "open sesame")
            .await
            .unwrap();
        assert_eq!(token.username, "alice");
        assert_eq!(sessions.load("alice").unwrap().unwrap(), token);

        logout(&sessions, "alice").unwrap();
        assert!(sessions.load("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_without_session() {
        let verifier = SaltedSha256Verifier;
        let store = Arc::new(MemoryStore::new());
        store
            .create_profile("alice", verifier.hash_password("open sesame"))
            .await;
        let sessions = MemorySessionStore::new();

        let error = login(store.as_ref(), &verifier, &sessions, "alice", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(sessions.load("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn login_rejects_unknown_username() {
        let verifier = SaltedSha256Verifier;
        let store = Arc::new(MemoryStore::new());
        let sessions = MemorySessionStore::new();

        let error = login(store.as_ref(), &verifier, &sessions, "nobody", "pw")
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }
}
