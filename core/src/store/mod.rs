//! Registry storage contract
//!
//! The registry lives in a single opaque blob under one fixed key. Backends
//! only have to move bytes; decoding is the registry's job.
//!
//! # Implementations
//! - [`MemoryStore`]: process-local, staged writes, real compare-and-swap
//! - [`FileStore`]: one file per key, atomic temp-file + rename on commit

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a registry store backend
#[derive(Debug, Error)]
pub enum StorageError {
    // ========================================================================
    // File-based backend errors
    // ========================================================================
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ========================================================================
    // Generic errors (any backend)
    // ========================================================================
    /// Error serializing the registry document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored blob could not be decoded.
    #[error("deserialization error for key {key}: {message}")]
    Deserialization { key: String, message: String },

    /// Backend is not reachable at all.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Compare-and-swap kept losing against concurrent writers.
    #[error("commit for key {key} lost {attempts} compare-and-swap races")]
    CommitConflict { key: String, attempts: u32 },
}

impl StorageError {
    /// Create a file I/O error with path context.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a deserialization error for a key.
    pub fn deserialization(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deserialization {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a compare-and-swap attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Value matched `expected` and was replaced durably
    Swapped,
    /// Someone else wrote the key since it was loaded
    Conflict,
    /// Backend has no compare-and-swap primitive
    Unsupported,
}

/// Durable key → bytes mapping behind the notify registry.
///
/// `save` may stage the write; it only has to be durable after `commit`.
/// A `load` after a `save` on the same store instance must observe the
/// saved bytes even before commit.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the blob stored under `key`, `None` if never written.
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stage `bytes` as the new value of `key`.
    async fn save(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()>;

    /// Make every staged write durable.
    async fn commit(&self) -> StorageResult<()>;

    /// Replace `key` with `bytes` only if the value `load` would return still
    /// equals `expected` (`None` meaning absent). The write is durable on
    /// [`SwapOutcome::Swapped`]; no separate commit is needed.
    ///
    /// Backends without such a primitive keep the default.
    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&[u8]>,
        _bytes: Vec<u8>,
    ) -> StorageResult<SwapOutcome> {
        Ok(SwapOutcome::Unsupported)
    }

    /// Backend name for logs
    fn name(&self) -> &str;
}
