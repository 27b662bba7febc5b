//! Pending uploads: file metadata waiting for its content.
//!
//! The metadata call stores the incoming document under a fresh key; the
//! content call consumes it. Keys expire after a TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// An incoming file waiting for its content.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub sharing_id: String,
    /// The member who sent the metadata.
    pub member: usize,
    /// The file document, ids already in our space, with `_revisions`.
    pub doc: Value,
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn put(&self, key: &str, upload: PendingUpload) -> Result<()>;

    /// Remove and return a pending upload. Expired keys are reported as
    /// absent.
    async fn take(&self, key: &str) -> Result<Option<PendingUpload>>;
}

/// Upload store kept in memory.
pub struct MemoryUploadStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, PendingUpload)>>,
}

impl MemoryUploadStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn put(&self, key: &str, upload: PendingUpload) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (at, _)| now.duration_since(*at) < self.ttl);
        entries.insert(key.to_string(), (now, upload));
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<PendingUpload>> {
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, upload)| upload))
    }
}
