//! Lifecycle of a sharing.
//!
//! ```text
//! Owner                                   Recipient
//!   create_sharing
//!   invite ---- PUT /sharings/{id} ------->  (stored, inactive)
//!                                           accept
//!          <--- POST /sharings/{id}/answer -
//!   member ready, sharing active  ------->  credentials, XOR key
//!   initial copy, replicate, upload
//!   DELETE /sharings/{id}/initial ------->  initial done
//! ```
//!
//! Revocation runs the other way: the owner revokes a member or the whole
//! sharing, a recipient leaves, and either side deactivates when told to or
//! when the other side refuses its credentials.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sharing_core::consts::{FILES, SHARED, SHARED_WITH_ME_DIR_ID, SHARED_WITH_ME_DIR_NAME, TRIGGERS};
use sharing_core::{conflict_name, validate_rules, validate_sharing_request, xor_id, Document, Rule, XorKey};
use sharing_perms::{
    normalize_instance, AccessToken, Credentials, Member, MemberStatus, OAuthClient, Sharing,
    Triggers,
};
use sharing_store::{DocumentStore, FileDoc, Vfs};
use sharing_sync::{AnswerRequest, AnswerResponse, RemoteTarget, SharingRequest, SyncError};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::jobs::{Job, JobKind};
use crate::notify::Invitation;

/// Worker of the triggers tracking each rule.
pub const TRACK_WORKER: &str = "share-track";
/// Worker of the trigger replicating documents.
pub const REPLICATE_WORKER: &str = "share-replicate";
/// Worker of the trigger uploading files.
pub const UPLOAD_WORKER: &str = "share-upload";

/// A sharing to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSharing {
    pub description: String,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub app_slug: String,
    #[serde(default)]
    pub preview_path: Option<String>,
    /// Recipients may invite other people.
    #[serde(default)]
    pub open: bool,
    /// Contact ids.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub read_only_recipients: Vec<String>,
    /// Contact group ids.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub read_only_groups: Vec<String>,
}

impl NewSharing {
    pub fn new(description: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            description: description.into(),
            rules,
            ..Default::default()
        }
    }

    pub fn with_recipient(mut self, contact_id: impl Into<String>, read_only: bool) -> Self {
        if read_only {
            self.read_only_recipients.push(contact_id.into());
        } else {
            self.recipients.push(contact_id.into());
        }
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>, read_only: bool) -> Self {
        if read_only {
            self.read_only_groups.push(group_id.into());
        } else {
            self.groups.push(group_id.into());
        }
        self
    }

    fn recipient_count(&self) -> usize {
        self.recipients.len()
            + self.read_only_recipients.len()
            + self.groups.len()
            + self.read_only_groups.len()
    }
}

/// The sharing as a recipient stores it: without credentials, triggers, or
/// preview codes, and with file ids in the recipient's id space.
fn sharing_request(sharing: &Sharing, member: usize) -> Result<SharingRequest> {
    let creds = sharing
        .credentials_for(member)
        .ok_or_else(|| EngineError::InvalidOperation(format!("member {} has no credentials", member)))?;
    let state = creds
        .state
        .clone()
        .ok_or_else(|| EngineError::InvalidOperation(format!("member {} was already answered", member)))?;
    let key = creds
        .xor_key
        .clone()
        .ok_or_else(|| EngineError::InvalidOperation(format!("member {} has no key", member)))?;

    let mut copy = sharing.clone();
    copy.rev = None;
    copy.owner = false;
    copy.active = false;
    copy.initial = false;
    copy.nb_files = 0;
    copy.triggers = Triggers::default();
    copy.credentials.clear();
    copy.preview_codes.clear();
    for rule in copy.rules.iter_mut().filter(|r| r.is_file_by_id()) {
        rule.values = rule.values.iter().map(|v| xor_id(v, &key)).collect();
    }
    Ok(SharingRequest {
        sharing: copy,
        state,
    })
}

impl<S: DocumentStore + 'static, V: Vfs + 'static> Engine<S, V> {
    async fn owned_sharing(&self, sharing_id: &str) -> Result<Sharing> {
        let sharing = self.sharing(sharing_id).await?;
        if !sharing.owner {
            return Err(EngineError::InvalidOperation(format!(
                "only the owner can do this on {}",
                sharing_id
            )));
        }
        Ok(sharing)
    }

    // Creation and invitations (owner)

    /// Create a sharing owned by this instance. Nothing is sent until
    /// [`Engine::invite`].
    pub async fn create_sharing(&self, request: NewSharing) -> Result<Sharing> {
        validate_sharing_request(&request.description, &request.rules, request.recipient_count())?;

        let owner = Member::owner(self.ctx.instance_url.clone(), self.config.public_name.clone());
        let mut sharing = Sharing::new(request.description.clone(), request.rules.clone(), owner);
        sharing.app_slug = request.app_slug.clone();
        sharing.preview_path = request.preview_path.clone();
        sharing.open = request.open;

        for (ids, read_only) in [(&request.recipients, false), (&request.read_only_recipients, true)] {
            for id in ids {
                let contact = self.resolve_contact(id).await?;
                sharing.add_contact(&contact, read_only)?;
            }
        }
        for (ids, read_only) in [(&request.groups, false), (&request.read_only_groups, true)] {
            for id in ids {
                let (group, contacts) = self.resolve_group(id).await?;
                sharing.add_group(&group, &contacts, read_only, 0)?;
            }
        }
        sharing.issue_preview_codes();
        self.ctx.save_sharing(&mut sharing).await?;
        info!(
            sharing_id = %sharing.id,
            recipients = sharing.members.len() - 1,
            groups = sharing.groups.len(),
            "sharing created"
        );
        Ok(sharing)
    }

    /// Send the invitations not sent yet: a sharing request to the members
    /// whose instance is known, a mail to the others. Returns the number of
    /// members invited.
    pub async fn invite(&self, sharing_id: &str) -> Result<usize> {
        self.owned_sharing(sharing_id).await?;
        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                for index in 1..s.members.len() {
                    if s.members[index].status != MemberStatus::MailNotSent {
                        continue;
                    }
                    if let Some(creds) = s.credentials_for_mut(index) {
                        if creds.xor_key.is_none() {
                            creds.xor_key = Some(XorKey::generate());
                        }
                    }
                }
                Ok(())
            })
            .await?;

        let mut invited = Vec::new();
        for index in 1..sharing.members.len() {
            if sharing.members[index].status != MemberStatus::MailNotSent {
                continue;
            }
            match self.send_invitation(&sharing, index).await {
                Ok(()) => invited.push(index),
                Err(e) => warn!(sharing_id, member = index, error = %e, "invitation not sent"),
            }
        }
        if !invited.is_empty() {
            self.ctx
                .modify_sharing(sharing_id, |s| {
                    for index in &invited {
                        let member = s.member_mut(*index)?;
                        if member.status == MemberStatus::MailNotSent {
                            member.status = MemberStatus::Pending;
                        }
                    }
                    Ok(())
                })
                .await?;
        }
        info!(sharing_id, invited = invited.len(), "invitations sent");
        Ok(invited.len())
    }

    async fn send_invitation(&self, sharing: &Sharing, index: usize) -> Result<()> {
        let member = sharing.member(index)?;
        if !member.instance.is_empty() {
            let request = sharing_request(sharing, index)?;
            let target = RemoteTarget::new(member.instance.clone(), None);
            self.ctx
                .transport
                .send_sharing_request(&target, &sharing.id, &request)
                .await?;
            debug!(sharing_id = %sharing.id, member = index, "sharing request sent");
            return Ok(());
        }
        let state = sharing
            .credentials_for(index)
            .and_then(|c| c.state.clone())
            .unwrap_or_default();
        let link = format!(
            "{}/sharings/{}/discovery?state={}",
            self.ctx.instance_url, sharing.id, state
        );
        self.notifier
            .send_invitation(Invitation::new(sharing, member, link))
            .await
            .map_err(EngineError::Notify)?;
        debug!(sharing_id = %sharing.id, member = index, "invitation mailed");
        Ok(())
    }

    /// A recipient invited by mail tells us its instance: the sharing
    /// request can now be sent.
    pub async fn discover(&self, sharing_id: &str, state: &str, instance: &str) -> Result<()> {
        let sharing = self.owned_sharing(sharing_id).await?;
        let member = sharing
            .member_for_state(state)
            .ok_or_else(|| EngineError::InvalidOperation("unknown invitation".into()))?;
        let instance = normalize_instance(instance);
        if instance.is_empty() {
            return Err(EngineError::InvalidOperation("an instance is required".into()));
        }

        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                s.member_mut(member)?.instance = instance.clone();
                Ok(())
            })
            .await?;
        let request = sharing_request(&sharing, member)?;
        self.ctx
            .transport
            .send_sharing_request(&RemoteTarget::new(instance.clone(), None), sharing_id, &request)
            .await?;
        self.ctx
            .modify_sharing(sharing_id, |s| {
                let m = s.member_mut(member)?;
                if matches!(m.status, MemberStatus::MailNotSent | MemberStatus::Seen) {
                    m.status = MemberStatus::Pending;
                }
                Ok(())
            })
            .await?;
        info!(sharing_id, member, instance = %instance, "recipient discovered");
        Ok(())
    }

    // Handshake

    /// Store the sharing an owner invites us to.
    pub(crate) async fn receive_sharing_request(
        &self,
        sharing_id: &str,
        request: SharingRequest,
    ) -> Result<()> {
        let SharingRequest { mut sharing, state } = request;
        validate_rules(&sharing.rules)?;
        if state.is_empty() {
            return Err(SyncError::InvalidMessage("sharing request without state".into()).into());
        }
        if sharing.member_by_instance(&self.ctx.instance_url).is_none() {
            return Err(SyncError::InvalidMessage(format!(
                "{} is not a member of {}",
                self.ctx.instance_url, sharing_id
            ))
            .into());
        }

        sharing.rev = match self.ctx.load_sharing(sharing_id).await {
            Ok(existing) if existing.owner || existing.active => {
                return Err(SyncError::Forbidden(format!("sharing {} already exists", sharing_id)).into());
            }
            Ok(existing) => existing.rev,
            Err(SyncError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        sharing.id = sharing_id.to_string();
        sharing.owner = false;
        sharing.active = false;
        sharing.triggers = Triggers::default();
        sharing.credentials = vec![Credentials {
            state: Some(state),
            ..Default::default()
        }];
        self.ctx.save_sharing(&mut sharing).await?;
        info!(sharing_id, owner = %sharing.members[0].instance, "sharing request received");
        Ok(())
    }

    /// Accept an invitation (recipient).
    pub async fn accept(&self, sharing_id: &str) -> Result<Sharing> {
        let sharing = self.sharing(sharing_id).await?;
        if sharing.owner || sharing.active {
            return Err(EngineError::InvalidOperation(format!(
                "no invitation to accept for {}",
                sharing_id
            )));
        }
        let me = sharing
            .member_by_instance(&self.ctx.instance_url)
            .ok_or_else(|| EngineError::InvalidOperation("not a member of this sharing".into()))?;
        let state = sharing
            .credentials_for(0)
            .and_then(|c| c.state.clone())
            .ok_or_else(|| EngineError::InvalidOperation("the invitation was already answered".into()))?;
        let owner = RemoteTarget::new(sharing.member(0)?.instance.clone(), None);

        // The owner may call us as soon as it has our token.
        let mut minted = None;
        self.ctx
            .modify_sharing(sharing_id, |s| {
                let creds = s
                    .credentials_for_mut(0)
                    .ok_or_else(|| SyncError::NotFound("credentials".into()))?;
                minted = Some(creds.mint_inbound());
                Ok(())
            })
            .await?;
        let (client_id, token) = minted
            .ok_or_else(|| EngineError::InvalidOperation("no credentials to answer with".into()))?;

        let request = AnswerRequest {
            state,
            instance: self.ctx.instance_url.clone(),
            public_name: self.config.public_name.clone(),
            client_id,
            access_token: token,
        };
        let response = self.ctx.transport.answer(&owner, sharing_id, &request).await?;

        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                let creds = s
                    .credentials_for_mut(0)
                    .ok_or_else(|| SyncError::NotFound("credentials".into()))?;
                creds.state = None;
                creds.client = Some(OAuthClient {
                    client_id: response.client_id.clone(),
                });
                creds.access_token = Some(response.access_token.clone());
                creds.xor_key = Some(response.xor_key.clone());
                s.member_mut(me)?.status = MemberStatus::Ready;
                s.active = true;
                s.initial = true;
                Ok(())
            })
            .await?;
        self.create_root_dir(&sharing).await?;
        self.setup_triggers(sharing_id).await?;
        info!(sharing_id, "sharing accepted");
        self.sharing(sharing_id).await
    }

    /// The directory receiving the shared files, under "Shared with me".
    async fn create_root_dir(&self, sharing: &Sharing) -> Result<()> {
        let Some(rule) = sharing.root_dir_rule() else {
            return Ok(());
        };
        let Some(id) = rule.values.first() else {
            return Ok(());
        };
        let vfs = self.ctx.vfs.as_ref();
        if vfs.get(id).await?.is_some() {
            return Ok(());
        }
        let parent = vfs
            .ensure_dir(SHARED_WITH_ME_DIR_ID, SHARED_WITH_ME_DIR_NAME)
            .await?;
        let siblings = vfs.children(&parent.id).await?;
        let taken: HashSet<&str> = siblings.iter().map(|f| f.name.as_str()).collect();
        let name = if taken.contains(rule.title.as_str()) {
            conflict_name(&rule.title, false, |n| taken.contains(n))?
        } else {
            rule.title.clone()
        };
        let dir = vfs
            .create_dir(FileDoc::new_dir(name, parent.id.clone()).with_id(id.clone()))
            .await?;
        debug!(sharing_id = %sharing.id, dir = %dir.id, name = %dir.name, "shared directory created");
        Ok(())
    }

    /// A recipient accepted (owner).
    pub(crate) async fn receive_answer(
        &self,
        sharing_id: &str,
        request: AnswerRequest,
    ) -> Result<AnswerResponse> {
        let sharing = self.sharing(sharing_id).await?;
        if !sharing.owner {
            return Err(SyncError::Forbidden(format!("not the owner of {}", sharing_id)).into());
        }
        let member = sharing
            .member_for_state(&request.state)
            .ok_or_else(|| SyncError::Unauthorized("unknown invitation state".into()))?;
        let instance = normalize_instance(&request.instance);
        if instance.is_empty() {
            return Err(SyncError::InvalidMessage("answer without instance".into()).into());
        }

        let new_key = XorKey::generate();
        let mut minted = None;
        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                let creds = s
                    .credentials_for_mut(member)
                    .ok_or_else(|| SyncError::NotFound(format!("credentials of member {}", member)))?;
                creds.state = None;
                creds.client = Some(OAuthClient {
                    client_id: request.client_id.clone(),
                });
                creds.access_token = Some(request.access_token.clone());
                minted = Some(creds.mint_inbound());
                creds.xor_key.get_or_insert_with(|| new_key.clone());

                let m = s.member_mut(member)?;
                m.status = MemberStatus::Ready;
                m.instance = instance.clone();
                if !request.public_name.is_empty() {
                    m.public_name = request.public_name.clone();
                }
                s.active = true;
                Ok(())
            })
            .await?;
        let xor_key = self.ctx.xor_key(&sharing, member)?;
        let (client_id, access_token) = minted
            .ok_or_else(|| EngineError::InvalidOperation("no credentials for the answer".into()))?;

        self.setup_triggers(sharing_id).await?;
        self.jobs.push(Job::new(sharing_id, JobKind::Initial), Duration::ZERO);
        self.notify_members(sharing_id)?;
        info!(sharing_id, member, instance = %instance, "invitation accepted");
        Ok(AnswerResponse {
            client_id,
            access_token,
            xor_key,
        })
    }

    /// A member rotates the token it presents to us.
    pub(crate) async fn refresh_inbound_token(
        &self,
        sharing_id: &str,
        refresh_token: &str,
    ) -> Result<AccessToken> {
        let mut refreshed = None;
        self.ctx
            .modify_sharing(sharing_id, |s| {
                let (member, token) = s.refresh_inbound(refresh_token)?;
                debug!(sharing_id, member, "access token refreshed");
                refreshed = Some(token);
                Ok(())
            })
            .await?;
        refreshed.ok_or_else(|| EngineError::InvalidOperation("token not refreshed".into()))
    }

    // Triggers

    async fn create_trigger(&self, worker: &str, arguments: &str, message: Value) -> Result<String> {
        let mut doc = Document::new(TRIGGERS, "");
        doc.set("type", "@event");
        doc.set("worker", worker);
        doc.set("arguments", arguments);
        doc.set("message", message);
        if worker != TRACK_WORKER {
            doc.set("debounce", format!("{}s", self.config.replicate_debounce.as_secs()));
        }
        self.ctx.store.create_doc(&mut doc).await?;
        Ok(doc.id)
    }

    /// Create the triggers of a sharing: one per propagating rule, one for
    /// the replicator, one for the uploader when files are shared.
    async fn install_triggers(&self, sharing: &Sharing) -> Result<Triggers> {
        let mut triggers = Triggers::default();
        if sharing.is_read_only_here(&self.ctx.instance_url) {
            return Ok(triggers);
        }
        for (index, rule) in sharing.rules.iter().enumerate() {
            let Some(args) = rule.trigger_args(sharing.owner) else {
                continue;
            };
            let message = json!({ "sharing_id": sharing.id, "rule_index": index });
            let id = self
                .create_trigger(TRACK_WORKER, &args.to_string(), message)
                .await?;
            triggers.track_ids.push(id);
        }
        if triggers.track_ids.is_empty() {
            return Ok(triggers);
        }
        let message = json!({ "sharing_id": sharing.id });
        triggers.replicate_id = Some(
            self.create_trigger(REPLICATE_WORKER, SHARED, message.clone())
                .await?,
        );
        if sharing.rules.iter().any(|r| r.doctype == FILES && !r.local) {
            triggers.upload_id = Some(self.create_trigger(UPLOAD_WORKER, SHARED, message).await?);
        }
        Ok(triggers)
    }

    pub(crate) async fn setup_triggers(&self, sharing_id: &str) -> Result<()> {
        let sharing = self.ctx.load_sharing(sharing_id).await?;
        if !sharing.triggers.is_empty() {
            return Ok(());
        }
        let triggers = self.install_triggers(&sharing).await?;
        if triggers.is_empty() {
            return Ok(());
        }
        debug!(sharing_id, tracked_rules = triggers.track_ids.len(), "triggers installed");
        self.ctx
            .modify_sharing(sharing_id, |s| {
                s.triggers = triggers.clone();
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn remove_triggers(&self, triggers: &Triggers) -> Result<()> {
        for id in triggers.all_ids() {
            if let Some(doc) = self.ctx.store.get_doc(TRIGGERS, &id).await? {
                self.ctx.store.delete_doc(&doc).await?;
            }
        }
        Ok(())
    }

    // Revocation

    async fn notify_revocation(&self, sharing_id: &str, member: usize) {
        let transport = self.ctx.transport.as_ref();
        let result = self
            .ctx
            .call_with_refresh(sharing_id, member, |target| async move {
                transport.revoke(&target, sharing_id).await
            })
            .await;
        if let Err(e) = result {
            warn!(sharing_id, member, error = %e, "member not told about the revocation");
        }
    }

    /// Stop the sharing on this instance: triggers, references, cursors and
    /// credentials are dropped.
    pub(crate) async fn deactivate(&self, sharing_id: &str) -> Result<()> {
        let instance = self.ctx.instance_url.clone();
        let mut triggers = Triggers::default();
        self.ctx
            .modify_sharing(sharing_id, |s| {
                triggers = std::mem::take(&mut s.triggers);
                s.active = false;
                s.initial = false;
                if s.owner {
                    for member in s.members.iter_mut().skip(1) {
                        member.status = MemberStatus::Revoked;
                    }
                } else if let Some(me) = s.member_by_instance(&instance) {
                    s.members[me].status = MemberStatus::Revoked;
                }
                s.clear_credentials();
                Ok(())
            })
            .await?;

        self.remove_triggers(&triggers).await?;
        let refs = self.ctx.remove_sharing_from_refs(sharing_id).await?;
        let cursors = self.ctx.clear_last_seqs(sharing_id, None).await?;
        let jobs = self.jobs.cancel(sharing_id);
        info!(sharing_id, refs, cursors, jobs, "sharing deactivated");
        Ok(())
    }

    /// Revoke the whole sharing (owner). Members are told first, on a best
    /// effort basis.
    pub async fn revoke_sharing(&self, sharing_id: &str) -> Result<()> {
        let sharing = self.owned_sharing(sharing_id).await?;
        for member in sharing.ready_members() {
            self.notify_revocation(sharing_id, member).await;
        }
        self.deactivate(sharing_id).await?;
        info!(sharing_id, "sharing revoked");
        Ok(())
    }

    /// A member is gone (owner). The sharing stops with its last recipient.
    pub(crate) async fn member_left(&self, sharing_id: &str, member: usize) -> Result<()> {
        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| Ok(s.revoke_member(member)?))
            .await?;
        self.ctx.clear_last_seqs(sharing_id, Some(member)).await?;
        info!(sharing_id, member, "member revoked");
        if sharing.has_active_recipients() {
            self.notify_members(sharing_id)
        } else {
            self.deactivate(sharing_id).await
        }
    }

    /// Revoke one recipient (owner).
    pub async fn revoke_member(&self, sharing_id: &str, member: usize) -> Result<()> {
        let sharing = self.owned_sharing(sharing_id).await?;
        if member == 0 {
            return Err(EngineError::InvalidOperation("the owner cannot be revoked".into()));
        }
        let status = sharing.member(member)?.status;
        if status.is_revoked() {
            return Ok(());
        }
        if sharing.active && status == MemberStatus::Ready {
            self.notify_revocation(sharing_id, member).await;
        }
        self.member_left(sharing_id, member).await
    }

    /// Revoke a group and the members present only through it (owner).
    pub async fn revoke_group(&self, sharing_id: &str, group: usize) -> Result<Vec<usize>> {
        let sharing = self.owned_sharing(sharing_id).await?;
        let revoked = sharing.clone().revoke_group(group)?;
        for member in &revoked {
            if sharing.active && sharing.members[*member].status == MemberStatus::Ready {
                self.notify_revocation(sharing_id, *member).await;
            }
        }
        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                s.revoke_group(group)?;
                Ok(())
            })
            .await?;
        for member in &revoked {
            self.ctx.clear_last_seqs(sharing_id, Some(*member)).await?;
        }
        info!(sharing_id, group, members = revoked.len(), "group revoked");
        if sharing.has_active_recipients() {
            self.notify_members(sharing_id)?;
        } else {
            self.deactivate(sharing_id).await?;
        }
        Ok(revoked)
    }

    /// Leave a sharing (recipient). The owner is told first, on a best
    /// effort basis.
    pub async fn leave(&self, sharing_id: &str) -> Result<()> {
        let sharing = self.sharing(sharing_id).await?;
        if sharing.owner {
            return Err(EngineError::InvalidOperation(
                "the owner revokes the sharing instead of leaving it".into(),
            ));
        }
        if sharing.active {
            self.notify_revocation(sharing_id, 0).await;
        }
        self.deactivate(sharing_id).await?;
        info!(sharing_id, "sharing left");
        Ok(())
    }

    /// The other side told us the sharing is over for us.
    pub(crate) async fn revoked_by(&self, sharing: &Sharing, member: usize) -> Result<()> {
        if sharing.owner {
            self.member_left(&sharing.id, member).await
        } else {
            info!(sharing_id = %sharing.id, "revoked by the owner");
            self.deactivate(&sharing.id).await
        }
    }
}
