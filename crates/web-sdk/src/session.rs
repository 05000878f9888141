//! Session identity: a per-client identifier with a rolling 30 minute
//! inactivity expiry.
//!
//! The identifier lives in durable storage while the last-activity timestamp
//! lives in ephemeral (per-tab) storage, so a fresh tab always starts a new
//! session. When storage fails the manager falls back to an identifier kept
//! in memory for the rest of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::clock::Clock;
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

/// Key-value storage used for session state.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> PulseResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> PulseResult<()>;
}

/// Process-local store. Serves as ephemeral storage and as the fallback
/// when nothing durable is available.
#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> PulseResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PulseResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Durable store persisting a JSON object to a single file.
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> PulseResult<HashMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(PulseError::SessionStorage(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> PulseResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> PulseResult<()> {
        let _guard = self.lock.lock();
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec(&values)?)?;
        Ok(())
    }
}

/// Store that always fails, modelling disabled storage (privacy modes).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSessionStore;

impl SessionStore for UnavailableSessionStore {
    fn get(&self, _key: &str) -> PulseResult<Option<String>> {
        Err(PulseError::SessionStorage("storage unavailable".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> PulseResult<()> {
        Err(PulseError::SessionStorage("storage unavailable".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timeout_minutes: i64,
    pub id_key: String,
    pub activity_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            id_key: "pulse_session_id".to_string(),
            activity_key: "pulse_session_start".to_string(),
        }
    }
}

pub struct SessionManager {
    durable: Arc<dyn SessionStore>,
    ephemeral: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    fallback_id: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new(
        durable: Arc<dyn SessionStore>,
        ephemeral: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            clock,
            config,
            fallback_id: Mutex::new(None),
        }
    }

    /// Both stores in memory; identity lasts for the process lifetime at most.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemorySessionStore::new()),
            clock,
            SessionConfig::default(),
        )
    }

    /// Current session identifier, minting a new one when the previous
    /// session expired. Never fails. Once storage has failed, the in-memory
    /// id is kept for the rest of the process even if storage recovers.
    pub fn get_session_id(&self) -> String {
        if let Some(id) = self.fallback_id.lock().clone() {
            return id;
        }
        match self.resolve() {
            Ok(id) => id,
            Err(e) => self.fallback(&e),
        }
    }

    fn resolve(&self) -> PulseResult<String> {
        let now = self.clock.now();
        let stored_id = self
            .durable
            .get(&self.config.id_key)?
            .filter(|id| !id.is_empty());
        let last_activity = self
            .ephemeral
            .get(&self.config.activity_key)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc));

        let timeout = Duration::minutes(self.config.timeout_minutes);
        let id = match (stored_id, last_activity) {
            (Some(id), Some(at)) if now - at <= timeout => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                self.durable.set(&self.config.id_key, &id)?;
                debug!(session_id = %id, "new session started");
                id
            }
        };

        self.ephemeral
            .set(&self.config.activity_key, &now.to_rfc3339())?;
        Ok(id)
    }

    fn fallback(&self, cause: &PulseError) -> String {
        let mut fallback = self.fallback_id.lock();
        if let Some(id) = fallback.as_ref() {
            return id.clone();
        }
        let id = Uuid::new_v4().to_string();
        warn!(error = %cause, "session storage unavailable, using in-memory session id");
        *fallback = Some(id.clone());
        id
    }
}

/// Non-reversible visitor identifier: hex SHA-256 of `salt` and `seed`.
pub fn visitor_hash(seed: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}
