//! Named advisory locks.
//!
//! Replication and uploads of a sharing are serialized per sharing; the
//! tracker serializes every write to the shared references.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Name of the lock guarding the shared references.
pub const SHARED_LOCK: &str = "shared";

pub fn replicate_lock(sharing_id: &str) -> String {
    format!("sharings/{}/replicate", sharing_id)
}

pub fn upload_lock(sharing_id: &str) -> String {
    format!("sharings/{}/upload", sharing_id)
}

/// A registry of read/write locks created on first use.
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    pub async fn read(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.get(name).read_owned().await
    }

    pub async fn write(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.get(name).write_owned().await
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry").finish_non_exhaustive()
    }
}
