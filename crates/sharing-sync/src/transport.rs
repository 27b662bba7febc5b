//! Transport abstraction for the peer protocol.
//!
//! [`Transport`] is the client side: one call per endpoint of a remote
//! instance. [`Inbound`] is the server side, implemented by the engine.
//! The HTTP implementation lives in [`crate::http`]; the in-memory one below
//! connects engines of the same process.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use sharing_perms::AccessToken;

use crate::error::Result;
use crate::messages::{
    AnswerRequest, AnswerResponse, BulkDocsRequest, DelegatedAdd, MembersUpdate, RevsDiffRequest,
    RevsDiffResponse, SharingRequest, UploadKey,
};

/// A remote instance and the bearer token to present to it.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub instance: String,
    pub token: Option<String>,
}

impl RemoteTarget {
    pub fn new(instance: impl Into<String>, token: Option<String>) -> Self {
        Self {
            instance: instance.into(),
            token,
        }
    }

    /// The same instance, without credentials.
    pub fn anonymous(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            token: None,
        }
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("instance", &self.instance)
            .field("token", &self.token.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Client side of the peer protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    // Handshake

    /// `PUT /sharings/{id}`: deliver an invitation.
    async fn send_sharing_request(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &SharingRequest,
    ) -> Result<()>;

    /// `POST /sharings/{id}/answer`: accept an invitation.
    async fn answer(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &AnswerRequest,
    ) -> Result<AnswerResponse>;

    /// `POST /sharings/{id}/access_token`: rotate our access token.
    async fn refresh_token(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        refresh_token: &str,
    ) -> Result<AccessToken>;

    // Replication

    /// `POST /sharings/{id}/_revs_diff`
    async fn revs_diff(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &RevsDiffRequest,
    ) -> Result<RevsDiffResponse>;

    /// `POST /sharings/{id}/_bulk_docs`
    async fn bulk_docs(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &BulkDocsRequest,
    ) -> Result<()>;

    /// `GET /sharings/{id}/{doctype}/{docid}`: fetch a shared document, used
    /// to recreate missing parent directories.
    async fn get_document(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        doctype: &str,
        id: &str,
    ) -> Result<Value>;

    // Files

    /// `PUT /sharings/{id}/io.cozy.files/{docid}/metadata`. Returns a key
    /// when the receiver needs the content.
    async fn upload_metadata(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        id: &str,
        doc: &Value,
    ) -> Result<Option<UploadKey>>;

    /// `PUT /sharings/{id}/io.cozy.files/{key}`
    async fn upload_content(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        key: &str,
        content: Bytes,
    ) -> Result<()>;

    /// `DELETE /sharings/{id}/initial`: the initial copy is complete.
    async fn end_initial(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()>;

    // Membership

    /// `DELETE /sharings/{id}`: the caller leaves, or revokes the callee.
    async fn revoke(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()>;

    /// `PUT /sharings/{id}/recipients`
    async fn update_members(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        update: &MembersUpdate,
    ) -> Result<()>;

    /// `POST /sharings/{id}/recipients/delegated`
    async fn delegated_add(
        &self,
        target: &RemoteTarget,
        sharing_id: &str,
        request: &DelegatedAdd,
    ) -> Result<MembersUpdate>;
}

/// Server side of the peer protocol. `token` is the bearer token the caller
/// presented.
#[async_trait]
pub trait Inbound: Send + Sync {
    async fn on_sharing_request(&self, sharing_id: &str, request: SharingRequest) -> Result<()>;

    async fn on_answer(&self, sharing_id: &str, request: AnswerRequest) -> Result<AnswerResponse>;

    async fn on_refresh_token(&self, sharing_id: &str, refresh_token: &str) -> Result<AccessToken>;

    async fn on_revs_diff(
        &self,
        token: &str,
        sharing_id: &str,
        request: RevsDiffRequest,
    ) -> Result<RevsDiffResponse>;

    async fn on_bulk_docs(&self, token: &str, sharing_id: &str, request: BulkDocsRequest) -> Result<()>;

    async fn on_get_document(
        &self,
        token: &str,
        sharing_id: &str,
        doctype: &str,
        id: &str,
    ) -> Result<Value>;

    async fn on_upload_metadata(
        &self,
        token: &str,
        sharing_id: &str,
        id: &str,
        doc: Value,
    ) -> Result<Option<UploadKey>>;

    async fn on_upload_content(
        &self,
        token: &str,
        sharing_id: &str,
        key: &str,
        content: Bytes,
    ) -> Result<()>;

    async fn on_end_initial(&self, token: &str, sharing_id: &str) -> Result<()>;

    async fn on_revoke(&self, token: &str, sharing_id: &str) -> Result<()>;

    async fn on_update_members(&self, token: &str, sharing_id: &str, update: MembersUpdate) -> Result<()>;

    async fn on_delegated_add(
        &self,
        token: &str,
        sharing_id: &str,
        request: DelegatedAdd,
    ) -> Result<MembersUpdate>;
}

/// In-memory transport for testing.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use serde::{de::DeserializeOwned, Serialize};
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock, Weak};

    use sharing_perms::normalize_instance;

    /// A registry of engines reachable by instance URL.
    ///
    /// Bodies go through JSON and errors through status codes, so that a
    /// peer sees what it would see over HTTP.
    #[derive(Clone, Default)]
    pub struct MemoryNetwork {
        peers: Arc<RwLock<HashMap<String, Weak<dyn Inbound>>>>,
        offline: Arc<RwLock<Vec<String>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register(&self, instance: &str, inbound: Weak<dyn Inbound>) {
            if let Ok(mut peers) = self.peers.write() {
                peers.insert(normalize_instance(instance), inbound);
            }
        }

        /// Make an instance unreachable, or reachable again.
        pub fn set_offline(&self, instance: &str, offline: bool) {
            if let Ok(mut list) = self.offline.write() {
                let instance = normalize_instance(instance);
                list.retain(|i| *i != instance);
                if offline {
                    list.push(instance);
                }
            }
        }

        pub fn transport(&self) -> MemoryTransport {
            MemoryTransport {
                network: self.clone(),
            }
        }

        fn peer(&self, instance: &str) -> Result<Arc<dyn Inbound>> {
            let instance = normalize_instance(instance);
            let offline = self
                .offline
                .read()
                .map_err(|e| SyncError::TransportError(e.to_string()))?;
            if offline.contains(&instance) {
                return Err(SyncError::TransportError(format!("{} is unreachable", instance)));
            }
            let peers = self
                .peers
                .read()
                .map_err(|e| SyncError::TransportError(e.to_string()))?;
            peers
                .get(&instance)
                .and_then(Weak::upgrade)
                .ok_or_else(|| SyncError::TransportError(format!("no route to {}", instance)))
        }
    }

    /// Transport over a [`MemoryNetwork`].
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: MemoryNetwork,
    }

    fn wire<T: Serialize, U: DeserializeOwned>(value: &T) -> Result<U> {
        let json = serde_json::to_value(value)
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        serde_json::from_value(json).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }

    fn respond<T: Serialize + DeserializeOwned>(result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => wire(&value),
            Err(e) => Err(SyncError::from_status(e.status_code(), e.to_string())),
        }
    }

    fn token(target: &RemoteTarget) -> &str {
        target.token.as_deref().unwrap_or("")
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_sharing_request(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            request: &SharingRequest,
        ) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_sharing_request(sharing_id, wire(request)?).await)
        }

        async fn answer(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            request: &AnswerRequest,
        ) -> Result<AnswerResponse> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_answer(sharing_id, wire(request)?).await)
        }

        async fn refresh_token(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            refresh_token: &str,
        ) -> Result<AccessToken> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_refresh_token(sharing_id, refresh_token).await)
        }

        async fn revs_diff(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            request: &RevsDiffRequest,
        ) -> Result<RevsDiffResponse> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_revs_diff(token(target), sharing_id, wire(request)?).await)
        }

        async fn bulk_docs(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            request: &BulkDocsRequest,
        ) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_bulk_docs(token(target), sharing_id, wire(request)?).await)
        }

        async fn get_document(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            doctype: &str,
            id: &str,
        ) -> Result<Value> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_get_document(token(target), sharing_id, doctype, id).await)
        }

        async fn upload_metadata(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            id: &str,
            doc: &Value,
        ) -> Result<Option<UploadKey>> {
            let peer = self.network.peer(&target.instance)?;
            respond(
                peer.on_upload_metadata(token(target), sharing_id, id, doc.clone())
                    .await,
            )
        }

        async fn upload_content(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            key: &str,
            content: Bytes,
        ) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_upload_content(token(target), sharing_id, key, content).await)
        }

        async fn end_initial(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_end_initial(token(target), sharing_id).await)
        }

        async fn revoke(&self, target: &RemoteTarget, sharing_id: &str) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_revoke(token(target), sharing_id).await)
        }

        async fn update_members(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            update: &MembersUpdate,
        ) -> Result<()> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_update_members(token(target), sharing_id, wire(update)?).await)
        }

        async fn delegated_add(
            &self,
            target: &RemoteTarget,
            sharing_id: &str,
            request: &DelegatedAdd,
        ) -> Result<MembersUpdate> {
            let peer = self.network.peer(&target.instance)?;
            respond(peer.on_delegated_add(token(target), sharing_id, wire(request)?).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::error::SyncError;
    use std::sync::Arc;

    /// Accepts one token and echoes revs_diff requests as fully missing.
    struct Echo;

    #[async_trait]
    impl Inbound for Echo {
        async fn on_sharing_request(&self, _: &str, _: SharingRequest) -> Result<()> {
            Ok(())
        }
        async fn on_answer(&self, _: &str, _: AnswerRequest) -> Result<AnswerResponse> {
            Err(SyncError::NotFound("no invitation".into()))
        }
        async fn on_refresh_token(&self, _: &str, _: &str) -> Result<AccessToken> {
            Err(SyncError::Unauthorized("unknown refresh token".into()))
        }
        async fn on_revs_diff(
            &self,
            token: &str,
            _: &str,
            request: RevsDiffRequest,
        ) -> Result<RevsDiffResponse> {
            if token != "good" {
                return Err(SyncError::Unauthorized("bad token".into()));
            }
            Ok(request
                .into_iter()
                .map(|(key, revs)| {
                    (
                        key,
                        crate::messages::MissingRevs {
                            missing: revs,
                            possible_ancestors: Vec::new(),
                        },
                    )
                })
                .collect())
        }
        async fn on_bulk_docs(&self, _: &str, _: &str, _: BulkDocsRequest) -> Result<()> {
            Err(SyncError::Safety("refused".into()))
        }
        async fn on_get_document(&self, _: &str, _: &str, _: &str, _: &str) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn on_upload_metadata(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Value,
        ) -> Result<Option<UploadKey>> {
            Ok(None)
        }
        async fn on_upload_content(&self, _: &str, _: &str, _: &str, _: Bytes) -> Result<()> {
            Ok(())
        }
        async fn on_end_initial(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn on_revoke(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn on_update_members(&self, _: &str, _: &str, _: MembersUpdate) -> Result<()> {
            Ok(())
        }
        async fn on_delegated_add(&self, _: &str, _: &str, _: DelegatedAdd) -> Result<MembersUpdate> {
            Err(SyncError::Forbidden("closed sharing".into()))
        }
    }

    fn network() -> (MemoryNetwork, Arc<dyn Inbound>) {
        let network = MemoryNetwork::new();
        let peer: Arc<dyn Inbound> = Arc::new(Echo);
        network.register("https://bob.example.net/", Arc::downgrade(&peer));
        (network, peer)
    }

    #[tokio::test]
    async fn test_memory_transport_routes_by_instance() {
        let (network, _peer) = network();
        let transport = network.transport();
        let target = RemoteTarget::new("https://bob.example.net", Some("good".into()));

        let mut request = RevsDiffRequest::new();
        request.insert("io.cozy.files/abc".into(), vec!["1-a".into()]);
        let response = transport.revs_diff(&target, "s1", &request).await.unwrap();
        assert_eq!(response["io.cozy.files/abc"].missing, vec!["1-a".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_transport_maps_errors_through_status() {
        let (network, _peer) = network();
        let transport = network.transport();
        let target = RemoteTarget::new("https://bob.example.net", Some("bad".into()));

        let err = transport
            .revs_diff(&target, "s1", &RevsDiffRequest::new())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        let err = transport
            .bulk_docs(&target, "s1", &BulkDocsRequest::new())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        let err = transport
            .answer(&target.anonymous(), "s1", &AnswerRequest {
                state: "x".into(),
                instance: "https://alice.example.net".into(),
                public_name: String::new(),
                client_id: "c".into(),
                access_token: AccessToken::generate(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: 404, .. }));

        let err = transport
            .delegated_add(&target, "s1", &DelegatedAdd { members: Vec::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: 422, .. }));
        assert!(!err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_offline_and_dropped_peers() {
        let (network, peer) = network();
        let transport = network.transport();
        let target = RemoteTarget::new("https://bob.example.net", None);

        network.set_offline("https://bob.example.net", true);
        let err = transport.end_initial(&target, "s1").await.unwrap_err();
        assert!(matches!(err, SyncError::TransportError(_)));
        network.set_offline("https://bob.example.net", false);
        transport.end_initial(&target, "s1").await.unwrap();

        drop(peer);
        let err = transport.end_initial(&target, "s1").await.unwrap_err();
        assert!(matches!(err, SyncError::TransportError(_)));
    }
}
