//! The peer protocol, as served by the engine.
//!
//! Every call but the handshake carries the bearer token of a member and is
//! authenticated first. Engine errors are reported with the status they
//! would have over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use sharing_perms::AccessToken;
use sharing_store::{DocumentStore, Vfs};
use sharing_sync::{
    AnswerRequest, AnswerResponse, BulkDocsRequest, DelegatedAdd, Inbound, MembersUpdate,
    Result, RevsDiffRequest, RevsDiffResponse, SharingRequest, SyncError, UploadKey,
};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::jobs::JobKind;

#[async_trait]
impl<S: DocumentStore + 'static, V: Vfs + 'static> Inbound for Engine<S, V> {
    async fn on_sharing_request(&self, sharing_id: &str, request: SharingRequest) -> Result<()> {
        self.receive_sharing_request(sharing_id, request)
            .await
            .map_err(EngineError::into_sync)
    }

    async fn on_answer(&self, sharing_id: &str, request: AnswerRequest) -> Result<AnswerResponse> {
        self.receive_answer(sharing_id, request)
            .await
            .map_err(EngineError::into_sync)
    }

    async fn on_refresh_token(&self, sharing_id: &str, refresh_token: &str) -> Result<AccessToken> {
        self.refresh_inbound_token(sharing_id, refresh_token)
            .await
            .map_err(EngineError::into_sync)
    }

    async fn on_revs_diff(
        &self,
        token: &str,
        sharing_id: &str,
        request: RevsDiffRequest,
    ) -> Result<RevsDiffResponse> {
        self.ctx.authenticate(sharing_id, token).await?;
        self.ctx.answer_revs_diff(request).await
    }

    async fn on_bulk_docs(&self, token: &str, sharing_id: &str, request: BulkDocsRequest) -> Result<()> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        let docs: usize = request.values().map(Vec::len).sum();
        let applied = self.ctx.apply_bulk_docs(&sharing, member, request).await;
        debug!(sharing_id, member, docs, ok = applied.is_ok(), "bulk docs received");
        self.forward(&sharing, JobKind::Replicate);
        applied
    }

    async fn on_get_document(
        &self,
        token: &str,
        sharing_id: &str,
        doctype: &str,
        id: &str,
    ) -> Result<Value> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        self.ctx.shared_document(&sharing, member, doctype, id).await
    }

    async fn on_upload_metadata(
        &self,
        token: &str,
        sharing_id: &str,
        id: &str,
        doc: Value,
    ) -> Result<Option<UploadKey>> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        let key = self.ctx.receive_file_metadata(&sharing, member, id, doc).await?;
        if key.is_none() {
            self.forward(&sharing, JobKind::Upload);
        }
        Ok(key)
    }

    async fn on_upload_content(
        &self,
        token: &str,
        sharing_id: &str,
        key: &str,
        content: Bytes,
    ) -> Result<()> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        self.ctx
            .receive_file_content(&sharing, member, key, content)
            .await?;
        self.forward(&sharing, JobKind::Upload);
        Ok(())
    }

    async fn on_end_initial(&self, token: &str, sharing_id: &str) -> Result<()> {
        let (sharing, _) = self.ctx.authenticate(sharing_id, token).await?;
        if sharing.owner {
            return Err(SyncError::Forbidden("only the owner ends the initial copy".into()));
        }
        self.ctx
            .modify_sharing(sharing_id, |s| {
                s.initial = false;
                Ok(())
            })
            .await?;
        debug!(sharing_id, "initial copy received");
        Ok(())
    }

    async fn on_revoke(&self, token: &str, sharing_id: &str) -> Result<()> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        self.revoked_by(&sharing, member)
            .await
            .map_err(EngineError::into_sync)
    }

    async fn on_update_members(&self, token: &str, sharing_id: &str, update: MembersUpdate) -> Result<()> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        if sharing.owner || member != 0 {
            return Err(SyncError::Forbidden("only the owner sends the member list".into()));
        }
        self.apply_members_update(sharing_id, update)
            .await
            .map_err(EngineError::into_sync)
    }

    async fn on_delegated_add(
        &self,
        token: &str,
        sharing_id: &str,
        request: DelegatedAdd,
    ) -> Result<MembersUpdate> {
        let (sharing, member) = self.ctx.authenticate(sharing_id, token).await?;
        if !sharing.owner {
            return Err(SyncError::Forbidden("only the owner invites".into()));
        }
        self.receive_delegated_add(&sharing, member, request)
            .await
            .map_err(EngineError::into_sync)
    }
}
