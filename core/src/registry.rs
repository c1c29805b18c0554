//! Notify registry
//!
//! Username → resumable session + delivery counter, kept as one versioned
//! JSON document under a single store key. A [`NotifyRegistry`] is only ever
//! a snapshot owned by the operation that loaded it; [`RegistrySlot`] is the
//! one way to load it and to write it back.
//!
//! # Commit protocol
//!
//! Every mutation is load-full → mutate → persist-full. When the backend
//! offers compare-and-swap the slot uses it and re-runs the mutation on a
//! fresh snapshot after a conflict. Otherwise it falls back to save + commit
//! and the last writer wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NudgeError, Result};
use crate::session::SessionHandle;
use crate::store::{RegistryStore, StorageError, StorageResult, SwapOutcome};

/// Storage key of the registry unless configured otherwise
pub const DEFAULT_REGISTRY_KEY: &str = "notify-registry";

const SCHEMA_VERSION: u32 = 1;

/// One registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub username: String,
    pub session: SessionHandle,
    pub delivery_count: u64,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_delivered_at: Option<DateTime<Utc>>,
}

/// What `upsert` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Replaced,
}

#[derive(Serialize, Deserialize)]
struct RegistryDocument {
    schema_version: u32,
    #[serde(default)]
    entries: Vec<RegistryEntry>,
}

/// Snapshot of the registry, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyRegistry {
    entries: Vec<RegistryEntry>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored blob. An absent blob is an empty registry.
    pub fn from_bytes(key: &str, bytes: Option<&[u8]>) -> StorageResult<Self> {
        let Some(bytes) = bytes else {
            return Ok(Self::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        let doc: RegistryDocument = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::deserialization(key, e.to_string()))?;
        if doc.schema_version != SCHEMA_VERSION {
            return Err(StorageError::deserialization(
                key,
                format!(
                    "incompatible schema version {}, expected {}",
                    doc.schema_version, SCHEMA_VERSION
                ),
            ));
        }

        Ok(Self { entries: doc.entries })
    }

    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        let doc = RegistryDocument {
            schema_version: SCHEMA_VERSION,
            entries: self.entries.clone(),
        };
        serde_json::to_vec(&doc).map_err(|e| StorageError::serialization(e.to_string()))
    }

    /// Register `username` at `handle`. A second registration replaces the
    /// stored session and leaves the delivery counter alone.
    pub fn upsert(&mut self, username: &str, handle: SessionHandle) -> Upserted {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.username == username) {
            entry.session = handle;
            return Upserted::Replaced;
        }

        self.entries.push(RegistryEntry {
            username: username.to_string(),
            session: handle,
            delivery_count: 0,
            registered_at: Utc::now(),
            last_delivered_at: None,
        });
        Upserted::Inserted
    }

    pub fn lookup(&self, username: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.username == username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.lookup(username).is_some()
    }

    /// Bump the delivery counter of an existing entry and return the new value.
    pub fn increment_and_get(&mut self, username: &str) -> Result<u64> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.username == username)
            .ok_or_else(|| NudgeError::unknown_user(username))?;
        entry.delivery_count += 1;
        entry.last_delivered_at = Some(Utc::now());
        Ok(entry.delivery_count)
    }

    /// Entries in registration order, for listings
    pub fn snapshot_for_display(&self) -> Vec<RegistryEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The (store, key) pair every registry operation goes through
#[derive(Clone)]
pub struct RegistrySlot {
    store: Arc<dyn RegistryStore>,
    key: Arc<str>,
    max_commit_attempts: u32,
}

impl RegistrySlot {
    pub fn new(store: Arc<dyn RegistryStore>, key: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            key: key.into(),
            max_commit_attempts: 5,
        }
    }

    /// Bound how many compare-and-swap conflicts one update tolerates
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Materialize a fresh snapshot from the store
    pub async fn load(&self) -> Result<NotifyRegistry> {
        let bytes = self.store.load(&self.key).await?;
        Ok(NotifyRegistry::from_bytes(&self.key, bytes.as_deref())?)
    }

    /// Run one load → mutate → persist cycle.
    ///
    /// If `mutate` fails nothing is written. `mutate` may run more than once
    /// when the store reports compare-and-swap conflicts, each time against
    /// a freshly loaded snapshot.
    pub async fn update<T, F>(&self, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut NotifyRegistry) -> Result<T>,
    {
        for attempt in 1..=self.max_commit_attempts {
            let original = self.store.load(&self.key).await?;
            let mut registry = NotifyRegistry::from_bytes(&self.key, original.as_deref())?;

            let value = mutate(&mut registry)?;
            let bytes = registry.to_bytes()?;

            match self
                .store
                .compare_and_swap(&self.key, original.as_deref(), bytes.clone())
                .await?
            {
                SwapOutcome::Swapped => {
                    debug!(key = %self.key, attempt, "registry committed via compare-and-swap");
                    return Ok(value);
                }
                SwapOutcome::Conflict => {
                    debug!(key = %self.key, attempt, "registry changed underneath, retrying");
                }
                SwapOutcome::Unsupported => {
                    self.store.save(&self.key, bytes).await?;
                    self.store.commit().await?;
                    debug!(key = %self.key, store = self.store.name(), "registry committed");
                    return Ok(value);
                }
            }
        }

        warn!(
            key = %self.key,
            attempts = self.max_commit_attempts,
            "giving up on registry commit"
        );
        Err(StorageError::CommitConflict {
            key: self.key.to_string(),
            attempts: self.max_commit_attempts,
        }
        .into())
    }
}
