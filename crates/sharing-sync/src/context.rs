//! Everything a sync operation needs on one instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sharing_core::consts::SHARINGS;
use sharing_core::XorKey;
use sharing_perms::Sharing;
use sharing_store::{DocumentStore, StoreError, Vfs};

use crate::error::{Result, SyncError};
use crate::lock::LockRegistry;
use crate::transport::{RemoteTarget, Transport};
use crate::upload_store::{MemoryUploadStore, UploadStore};

/// Configuration for replication and uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Changes read from the shared feed per replication round.
    pub batch_size: usize,
    /// Changes read from the shared feed per upload round.
    pub upload_batch_size: usize,
    /// Timeout of a single request to a peer.
    pub request_timeout: Duration,
    /// Base delay of the retry schedule.
    pub retry_base: Duration,
    pub max_retries: u32,
    /// How long an upload key waits for its content.
    pub upload_ttl: Duration,
    /// Deepest chain of missing parent directories fetched from a peer.
    pub max_missing_ancestors: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            upload_batch_size: 100,
            request_timeout: Duration::from_secs(30),
            retry_base: Duration::from_secs(60),
            max_retries: crate::retry::MAX_RETRIES,
            upload_ttl: Duration::from_secs(3600),
            max_missing_ancestors: 32,
        }
    }
}

/// Stores, transport and locks of one instance.
pub struct SyncContext<S, V> {
    /// Public URL of this instance.
    pub instance_url: String,
    pub store: Arc<S>,
    pub vfs: Arc<V>,
    pub transport: Arc<dyn Transport>,
    pub uploads: Arc<dyn UploadStore>,
    pub locks: LockRegistry,
    pub config: SyncConfig,
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    pub fn new(
        instance_url: impl Into<String>,
        store: Arc<S>,
        vfs: Arc<V>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = SyncConfig::default();
        Self {
            instance_url: sharing_perms::normalize_instance(&instance_url.into()),
            store,
            vfs,
            transport,
            uploads: Arc::new(MemoryUploadStore::new(config.upload_ttl)),
            locks: LockRegistry::new(),
            config,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.uploads = Arc::new(MemoryUploadStore::new(config.upload_ttl));
        self.config = config;
        self
    }

    pub fn with_upload_store(mut self, uploads: Arc<dyn UploadStore>) -> Self {
        self.uploads = uploads;
        self
    }

    // Sharing documents

    pub async fn load_sharing(&self, sharing_id: &str) -> Result<Sharing> {
        let doc = self
            .store
            .get_doc(SHARINGS, sharing_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("sharing {}", sharing_id)))?;
        Ok(Sharing::from_document(&doc)?)
    }

    pub async fn load_active_sharing(&self, sharing_id: &str) -> Result<Sharing> {
        let sharing = self.load_sharing(sharing_id).await?;
        if !sharing.active {
            return Err(SyncError::Inactive(sharing_id.to_string()));
        }
        Ok(sharing)
    }

    pub async fn all_sharings(&self) -> Result<Vec<Sharing>> {
        let docs = self.store.all_docs(SHARINGS).await?;
        let mut out = Vec::with_capacity(docs.len());
        for doc in &docs {
            out.push(Sharing::from_document(doc)?);
        }
        Ok(out)
    }

    /// Create or update a sharing. Its revision is refreshed.
    pub async fn save_sharing(&self, sharing: &mut Sharing) -> Result<()> {
        sharing.touch();
        let mut doc = sharing.to_document()?;
        if doc.rev.is_none() {
            self.store.create_doc(&mut doc).await?;
            sharing.id = doc.id.clone();
        } else {
            self.store.update_doc(&mut doc).await?;
        }
        sharing.rev = doc.rev;
        Ok(())
    }

    /// Reload, change and save a sharing, retrying when another writer got
    /// there first.
    pub async fn modify_sharing<F>(&self, sharing_id: &str, mut change: F) -> Result<Sharing>
    where
        F: FnMut(&mut Sharing) -> Result<()> + Send,
    {
        let mut attempts = 0;
        loop {
            let mut sharing = self.load_sharing(sharing_id).await?;
            change(&mut sharing)?;
            match self.save_sharing(&mut sharing).await {
                Ok(()) => return Ok(sharing),
                Err(SyncError::StoreError(StoreError::Conflict { .. })) if attempts < 3 => {
                    attempts += 1;
                    debug!(sharing_id, attempts, "sharing changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Peers

    /// Where to reach a member, with the token it expects from us.
    pub fn target(&self, sharing: &Sharing, member: usize) -> Result<RemoteTarget> {
        let instance = &sharing.member(member)?.instance;
        if instance.is_empty() {
            return Err(SyncError::NotFound(format!(
                "no instance known for member {} of {}",
                member, sharing.id
            )));
        }
        let token = sharing
            .credentials_for(member)
            .and_then(|c| c.outbound_token())
            .map(String::from);
        Ok(RemoteTarget::new(instance.clone(), token))
    }

    /// The XOR key shared with a member.
    pub fn xor_key(&self, sharing: &Sharing, member: usize) -> Result<XorKey> {
        sharing
            .credentials_for(member)
            .and_then(|c| c.xor_key.clone())
            .ok_or_else(|| SyncError::Forbidden(format!("no key for member {} of {}", member, sharing.id)))
    }

    /// Identify the member calling us with this bearer token.
    pub async fn authenticate(&self, sharing_id: &str, token: &str) -> Result<(Sharing, usize)> {
        let sharing = self.load_sharing(sharing_id).await?;
        let member = sharing
            .member_for_token(token)
            .ok_or_else(|| SyncError::Unauthorized(format!("invalid token for {}", sharing_id)))?;
        if sharing.member(member)?.status.is_revoked() {
            return Err(SyncError::Unauthorized(format!("member {} was revoked", member)));
        }
        if !sharing.active {
            return Err(SyncError::Inactive(sharing_id.to_string()));
        }
        Ok((sharing, member))
    }

    /// Call a member. A client error triggers one token refresh and one
    /// retry; the refreshed token is saved in the sharing.
    pub async fn call_with_refresh<T, F, Fut>(&self, sharing_id: &str, member: usize, call: F) -> Result<T>
    where
        F: Fn(RemoteTarget) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let sharing = self.load_sharing(sharing_id).await?;
        let target = self.target(&sharing, member)?;
        let err = match call(target.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_client_error() => e,
            Err(e) => return Err(e),
        };

        let Some(refresh) = sharing
            .credentials_for(member)
            .and_then(|c| c.access_token.as_ref())
            .map(|t| t.refresh_token.clone())
        else {
            return Err(err);
        };
        debug!(sharing_id, member, "refreshing access token");
        let refreshed = match self
            .transport
            .refresh_token(&target.anonymous(), sharing_id, &refresh)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!(sharing_id, member, error = %e, "token refresh failed");
                return Err(err);
            }
        };
        let token = refreshed.access_token.clone();
        self.modify_sharing(sharing_id, |s| {
            if let Some(creds) = s.credentials_for_mut(member) {
                creds.access_token = Some(refreshed.clone());
            }
            Ok(())
        })
        .await?;

        call(RemoteTarget::new(target.instance, Some(token))).await
    }
}
