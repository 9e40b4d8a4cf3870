use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::storage::SecureStorage;
use crate::models::UserProfile;

/// Storage key for the opaque access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the `{user, isAuthenticated}` blob
pub const SESSION_KEY: &str = "session";

/// A bearer credential. Debug output never includes the token itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Session metadata persisted alongside the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
}

/// Holds the single live credential in memory and mirrors it to secure storage.
///
/// The in-memory value is authoritative for the process lifetime; storage
/// failures are logged and otherwise ignored. Cloning shares the same store.
///
/// Every change bumps a generation counter. The counter's lock is held while
/// a change is written to storage and published, so `set` and `clear` never
/// interleave and memory always matches the last write attempted.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecureStorage>,
    current: Arc<watch::Sender<Option<Credential>>>,
    generation: Arc<Mutex<u64>>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SecureStorage>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            backend,
            current: Arc::new(current),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Read the persisted token into memory. Storage errors read as absent.
    pub fn load(&self) -> Option<Credential> {
        let mut generation = self.generation.lock();
        let credential = match self.backend.read(ACCESS_TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => Some(Credential::new(token)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential");
                None
            }
        };
        debug!(found = credential.is_some(), "Credential loaded from storage");
        self.current.send_replace(credential.clone());
        *generation += 1;
        credential
    }

    pub fn get(&self) -> Option<Credential> {
        self.current.borrow().clone()
    }

    /// Number of changes made to the store so far.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// The current credential together with its generation.
    pub fn snapshot(&self) -> (Option<Credential>, u64) {
        let generation = self.generation.lock();
        (self.current.borrow().clone(), *generation)
    }

    /// Replace the credential. Persistence is best-effort.
    pub fn set(&self, credential: Credential) {
        let mut generation = self.generation.lock();
        self.write_through(&mut generation, credential);
    }

    /// Replace the credential only if nothing changed since `expected`.
    pub fn set_if_unchanged(&self, credential: Credential, expected: u64) -> bool {
        let mut generation = self.generation.lock();
        if *generation != expected {
            return false;
        }
        self.write_through(&mut generation, credential);
        true
    }

    /// Drop the credential and the session blob. Persistence is best-effort.
    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        self.erase(&mut generation);
    }

    /// Clear only if nothing changed since `expected`.
    pub fn clear_if_unchanged(&self, expected: u64) -> bool {
        let mut generation = self.generation.lock();
        if *generation != expected {
            return false;
        }
        self.erase(&mut generation);
        true
    }

    fn write_through(&self, generation: &mut u64, credential: Credential) {
        if let Err(e) = self.backend.write(ACCESS_TOKEN_KEY, &credential.access_token) {
            warn!(error = %e, "Failed to persist credential");
        }
        self.current.send_replace(Some(credential));
        *generation += 1;
    }

    fn erase(&self, generation: &mut u64) {
        if let Err(e) = self.backend.remove(ACCESS_TOKEN_KEY) {
            warn!(error = %e, "Failed to delete stored credential");
        }
        if let Err(e) = self.backend.remove(SESSION_KEY) {
            warn!(error = %e, "Failed to delete stored session");
        }
        self.current.send_replace(None);
        *generation += 1;
    }

    /// Watch credential changes (e.g. to redirect to login when it is cleared).
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.current.subscribe()
    }

    pub fn save_session(&self, session: &PersistedSession) {
        let result = serde_json::to_string(session)
            .map_err(anyhow::Error::from)
            .and_then(|blob| self.backend.write(SESSION_KEY, &blob));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }

    pub fn load_session(&self) -> Option<PersistedSession> {
        match self.backend.read(SESSION_KEY) {
            Ok(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable session blob");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                None
            }
        }
    }
}
