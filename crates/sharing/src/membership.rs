//! Members of a sharing after its creation: new recipients, groups, the
//! member list pushed to recipients, and delegated invitations on open
//! sharings.

use tracing::{debug, info, warn};

use sharing_perms::{Contact, ContactGroup, Member, MemberStatus, Sharing};
use sharing_store::{list_all_buckets, walk_tree, BucketItem, DocumentStore, Vfs};
use sharing_sync::{DelegatedAdd, MembersUpdate, SyncError};

use crate::engine::Engine;
use crate::error::{EngineError, Result};

fn member_from_contact(contact: &Contact) -> Member {
    Member::new(MemberStatus::MailNotSent)
        .with_name(contact.fullname.clone())
        .with_email(contact.primary_email().unwrap_or_default())
        .with_instance(contact.primary_cozy_url().unwrap_or_default())
}

impl<S: DocumentStore + 'static, V: Vfs + 'static> Engine<S, V> {
    pub(crate) async fn resolve_contact(&self, contact_id: &str) -> Result<Contact> {
        self.contacts
            .contact(contact_id)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(contact_id.to_string()))
    }

    pub(crate) async fn resolve_group(&self, group_id: &str) -> Result<(ContactGroup, Vec<Contact>)> {
        let group = self
            .contacts
            .group(group_id)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(group_id.to_string()))?;
        let contacts = self.contacts.group_members(group_id).await?;
        Ok((group, contacts))
    }

    /// Add recipients to a sharing and invite them (owner). Returns the
    /// number of members invited.
    pub async fn add_recipients(
        &self,
        sharing_id: &str,
        contact_ids: &[String],
        read_only: bool,
    ) -> Result<usize> {
        let sharing = self.sharing(sharing_id).await?;
        if !sharing.owner {
            return Err(EngineError::InvalidOperation(
                "recipients ask the owner to add members".into(),
            ));
        }
        let mut contacts = Vec::with_capacity(contact_ids.len());
        for id in contact_ids {
            contacts.push(self.resolve_contact(id).await?);
        }
        self.ctx
            .modify_sharing(sharing_id, |s| {
                for contact in &contacts {
                    s.add_contact(contact, read_only)?;
                }
                s.issue_preview_codes();
                Ok(())
            })
            .await?;
        let invited = self.invite(sharing_id).await?;
        self.notify_members(sharing_id)?;
        Ok(invited)
    }

    /// Add a contact group to a sharing and invite its members (owner).
    /// Returns the index of the group.
    pub async fn add_group(&self, sharing_id: &str, group_id: &str, read_only: bool) -> Result<usize> {
        let sharing = self.sharing(sharing_id).await?;
        if !sharing.owner {
            return Err(EngineError::InvalidOperation("only the owner adds groups".into()));
        }
        let (group, contacts) = self.resolve_group(group_id).await?;
        let mut index = 0;
        self.ctx
            .modify_sharing(sharing_id, |s| {
                index = s.add_group(&group, &contacts, read_only, 0)?;
                s.issue_preview_codes();
                Ok(())
            })
            .await?;
        self.invite(sharing_id).await?;
        self.notify_members(sharing_id)?;
        info!(sharing_id, group = index, contacts = contacts.len(), "group added");
        Ok(index)
    }

    // Open sharings

    /// Ask the owner of an open sharing to invite contacts (recipient).
    pub async fn delegate_add(&self, sharing_id: &str, contact_ids: &[String]) -> Result<()> {
        let sharing = self.sharing(sharing_id).await?;
        if sharing.owner {
            return Err(EngineError::InvalidOperation(
                "the owner adds recipients directly".into(),
            ));
        }
        if !sharing.open || !sharing.active || sharing.is_read_only_here(&self.ctx.instance_url) {
            return Err(EngineError::InvalidOperation(format!(
                "sharing {} does not let this member invite",
                sharing_id
            )));
        }
        let mut members = Vec::with_capacity(contact_ids.len());
        for id in contact_ids {
            members.push(member_from_contact(&self.resolve_contact(id).await?));
        }

        let request = DelegatedAdd { members };
        let transport = self.ctx.transport.as_ref();
        let request = &request;
        let update = self
            .ctx
            .call_with_refresh(sharing_id, 0, |target| async move {
                transport.delegated_add(&target, sharing_id, request).await
            })
            .await?;
        self.apply_members_update(sharing_id, update).await
    }

    /// A recipient of an open sharing asks us to invite people (owner).
    pub(crate) async fn receive_delegated_add(
        &self,
        sharing: &Sharing,
        member: usize,
        request: DelegatedAdd,
    ) -> Result<MembersUpdate> {
        if !sharing.open || sharing.is_read_only_for(member) {
            return Err(SyncError::Forbidden(format!(
                "member {} cannot invite on {}",
                member, sharing.id
            ))
            .into());
        }
        self.ctx
            .modify_sharing(&sharing.id, |s| {
                for added in &request.members {
                    let mut added = added.clone();
                    added.status = MemberStatus::MailNotSent;
                    added.read_only = false;
                    added.only_in_groups = false;
                    added.groups.clear();
                    s.add_member(added)?;
                }
                s.issue_preview_codes();
                Ok(())
            })
            .await?;
        let invited = self.invite(&sharing.id).await?;
        debug!(sharing_id = %sharing.id, member, invited, "delegated invitations sent");

        let sharing = self.sharing(&sharing.id).await?;
        self.notify_members(&sharing.id)?;
        Ok(MembersUpdate {
            members: sharing.members,
            groups: sharing.groups,
        })
    }

    // Member list

    /// Push the member list to the recipients, shortly, on its own task.
    pub(crate) fn notify_members(&self, sharing_id: &str) -> Result<()> {
        let engine = self.arc()?;
        let sharing_id = sharing_id.to_string();
        let delay = self.config.notify_delay;
        self.spawn_task(format!("members:{}", sharing_id), async move {
            tokio::time::sleep(delay).await;
            engine.send_members(&sharing_id).await
        });
        Ok(())
    }

    /// Push the member list to every ready recipient (owner).
    pub async fn send_members(&self, sharing_id: &str) -> Result<()> {
        let sharing = self.sharing(sharing_id).await?;
        if !sharing.owner || !sharing.active {
            return Ok(());
        }
        let update = MembersUpdate {
            members: sharing.members.clone(),
            groups: sharing.groups.clone(),
        };
        let transport = self.ctx.transport.as_ref();
        let update = &update;
        let mut errors = Vec::new();
        for member in sharing.ready_members() {
            let sent = self
                .ctx
                .call_with_refresh(sharing_id, member, |target| async move {
                    transport.update_members(&target, sharing_id, update).await
                })
                .await;
            if let Err(e) = sent {
                warn!(sharing_id, member, error = %e, "member list not sent");
                errors.push(e);
            }
        }
        SyncError::collect(errors)?;
        Ok(())
    }

    /// Replace our copy of the member list with the owner's (recipient).
    pub(crate) async fn apply_members_update(&self, sharing_id: &str, update: MembersUpdate) -> Result<()> {
        let sharing = self
            .ctx
            .modify_sharing(sharing_id, |s| {
                if s.owner {
                    return Err(SyncError::Forbidden(
                        "the owner keeps its own member list".into(),
                    ));
                }
                s.members = update.members.clone();
                s.groups = update.groups.clone();
                Ok(())
            })
            .await?;
        let revoked = sharing
            .member_by_instance(&self.ctx.instance_url)
            .is_some_and(|me| sharing.members[me].status.is_revoked());
        debug!(sharing_id, members = sharing.members.len(), revoked, "member list updated");
        if revoked && sharing.active {
            info!(sharing_id, "revoked in the member list");
            self.deactivate(sharing_id).await?;
        }
        Ok(())
    }

    // Listing

    /// The shared directory tree, split into buckets of at most `max_bytes`
    /// for chunked listing.
    pub async fn list_shared_tree(&self, sharing_id: &str, max_bytes: u64) -> Result<Vec<Vec<BucketItem>>> {
        let sharing = self.sharing(sharing_id).await?;
        let root = sharing.root_dir_id().ok_or_else(|| {
            EngineError::InvalidOperation(format!("sharing {} has no shared directory", sharing_id))
        })?;
        let entries = walk_tree(self.ctx.vfs.as_ref(), root).await?;
        Ok(list_all_buckets(&entries, max_bytes))
    }
}
