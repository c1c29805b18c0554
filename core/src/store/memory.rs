//! In-memory registry store
//!
//! For single-process use and tests. Writes are staged until `commit`, and
//! compare-and-swap is honoured against the value `load` would return.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RegistryStore, StorageError, StorageResult, SwapOutcome};

#[derive(Default)]
struct MemoryState {
    committed: HashMap<String, Vec<u8>>,
    staged: HashMap<String, Vec<u8>>,
}

/// Process-local store. Durable only for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits and swaps so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Committed value of `key`, ignoring staged writes
    pub fn committed(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().committed.get(key).cloned()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .staged
            .get(key)
            .or_else(|| state.committed.get(key))
            .cloned())
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.check_available()?;
        self.state.lock().staged.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn commit(&self) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        let staged = std::mem::take(&mut state.staged);
        state.committed.extend(staged);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        bytes: Vec<u8>,
    ) -> StorageResult<SwapOutcome> {
        self.check_available()?;
        let mut state = self.state.lock();
        let current = state.staged.get(key).or_else(|| state.committed.get(key));
        if current.map(Vec::as_slice) != expected {
            return Ok(SwapOutcome::Conflict);
        }
        state.staged.remove(key);
        state.committed.insert(key.to_string(), bytes);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(SwapOutcome::Swapped)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
