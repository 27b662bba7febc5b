//! The sharing document and its membership operations.
//!
//! Members and credentials are index aligned. On the owner, `credentials[i]`
//! belongs to `members[i + 1]`; on a recipient there is a single entry, for
//! the owner. Members are never removed, only revoked, so indices are stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sharing_core::consts::{FILES, SHARINGS};
use sharing_core::{now_millis, Document, Rule};

use crate::contacts::{Contact, ContactGroup};
use crate::credentials::{new_code, AccessToken, Credentials};
use crate::error::{PermsError, Result};
use crate::member::{normalize_instance, Group, Member, MemberStatus};

/// Background triggers of a sharing on this instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triggers {
    /// One tracking trigger per rule that propagates from this side.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub track_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
}

impl Triggers {
    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty() && self.replicate_id.is_none() && self.upload_id.is_none()
    }

    /// Every trigger id, for teardown.
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids = self.track_ids.clone();
        ids.extend(self.replicate_id.iter().cloned());
        ids.extend(self.upload_id.iter().cloned());
        ids
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// A sharing, as stored on the owner or on a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sharing {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Triggers::is_empty")]
    pub triggers: Triggers,
    #[serde(default, skip_serializing_if = "is_false")]
    pub active: bool,
    /// This instance is the sharer.
    #[serde(default, skip_serializing_if = "is_false")]
    pub owner: bool,
    /// Recipients may invite others.
    #[serde(rename = "open_sharing", default, skip_serializing_if = "is_false")]
    pub open: bool,
    /// The initial copy is still running.
    #[serde(rename = "initial_sync", default, skip_serializing_if = "is_false")]
    pub initial: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_path: Option<String>,
    /// Preview code per member email.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preview_codes: BTreeMap<String, String>,
    /// Files expected by the initial copy.
    #[serde(rename = "initial_number_of_files_to_sync", default, skip_serializing_if = "is_zero")]
    pub nb_files: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub rules: Vec<Rule>,
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credentials>,
}

impl Sharing {
    /// A new sharing on the owner's instance.
    pub fn new(description: impl Into<String>, rules: Vec<Rule>, owner: Member) -> Self {
        let now = now_millis();
        Self {
            id: String::new(),
            rev: None,
            triggers: Triggers::default(),
            active: false,
            owner: true,
            open: false,
            initial: false,
            description: description.into(),
            app_slug: String::new(),
            preview_path: None,
            preview_codes: BTreeMap::new(),
            nb_files: 0,
            created_at: now,
            updated_at: now,
            rules,
            members: vec![owner],
            groups: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(Document::from_typed(SHARINGS, self)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(doc.decode()?)
    }

    // Members

    /// Index of the member living on the given instance.
    pub fn member_by_instance(&self, instance: &str) -> Option<usize> {
        let instance = normalize_instance(instance);
        self.members.iter().position(|m| m.instance == instance)
    }

    /// Index of this instance in the member list.
    pub fn self_index(&self, instance_url: &str) -> Option<usize> {
        if self.owner {
            return Some(0);
        }
        self.member_by_instance(instance_url)
    }

    pub fn member(&self, index: usize) -> Result<&Member> {
        self.members.get(index).ok_or(PermsError::MemberNotFound(index))
    }

    pub fn member_mut(&mut self, index: usize) -> Result<&mut Member> {
        self.members
            .get_mut(index)
            .ok_or(PermsError::MemberNotFound(index))
    }

    /// Add a member, or return the index of the existing entry for the same
    /// person. A direct add makes the member independent of its groups.
    pub fn add_member(&mut self, member: Member) -> Result<usize> {
        if !self.owner {
            return Err(PermsError::NotOwner(self.id.clone()));
        }
        if let Some(index) = self
            .members
            .iter()
            .position(|m| !m.status.is_revoked() && m.same_person(&member))
        {
            let existing = &mut self.members[index];
            existing.only_in_groups = existing.only_in_groups && member.only_in_groups;
            existing.read_only = existing.read_only && member.read_only;
            return Ok(index);
        }
        if member.email.is_empty() && member.instance.is_empty() {
            return Err(PermsError::InvalidMember(
                "a member needs an email or an instance".into(),
            ));
        }
        self.members.push(member);
        self.credentials.push(Credentials::invitation());
        Ok(self.members.len() - 1)
    }

    /// Add a contact as a member.
    pub fn add_contact(&mut self, contact: &Contact, read_only: bool) -> Result<usize> {
        let member = Member::new(MemberStatus::MailNotSent)
            .with_name(contact.fullname.clone())
            .with_email(contact.primary_email().unwrap_or_default())
            .with_instance(contact.primary_cozy_url().unwrap_or_default())
            .read_only(read_only);
        self.add_member(member)
    }

    /// Add a contact group. Its contacts that are not already members join
    /// with `only_in_groups` set. Returns the group index.
    pub fn add_group(
        &mut self,
        group: &ContactGroup,
        contacts: &[Contact],
        read_only: bool,
        added_by: usize,
    ) -> Result<usize> {
        if let Some(index) = self
            .groups
            .iter()
            .position(|g| g.id == group.id && !g.revoked)
        {
            return Ok(index);
        }
        self.groups.push(Group {
            id: group.id.clone(),
            name: group.name.clone(),
            added_by,
            read_only,
            revoked: false,
        });
        let group_index = self.groups.len() - 1;

        for contact in contacts {
            let mut member = Member::new(MemberStatus::MailNotSent)
                .with_name(contact.fullname.clone())
                .with_email(contact.primary_email().unwrap_or_default())
                .with_instance(contact.primary_cozy_url().unwrap_or_default())
                .read_only(read_only);
            member.only_in_groups = true;
            let index = match self.add_member(member) {
                Ok(index) => index,
                Err(PermsError::InvalidMember(_)) => continue,
                Err(e) => return Err(e),
            };
            let groups = &mut self.members[index].groups;
            if !groups.contains(&group_index) {
                groups.push(group_index);
            }
        }
        Ok(group_index)
    }

    /// Revoke one member and clear its credentials.
    pub fn revoke_member(&mut self, index: usize) -> Result<()> {
        if index == 0 && self.owner {
            return Err(PermsError::PermissionDenied(
                "the owner cannot be revoked".into(),
            ));
        }
        self.member_mut(index)?.status = MemberStatus::Revoked;
        if let Some(creds) = self.credentials_for_mut(index) {
            creds.clear();
        }
        self.updated_at = now_millis();
        Ok(())
    }

    /// Revoke a group. Members that were only there through their groups
    /// and have none left are revoked too; their indices are returned.
    pub fn revoke_group(&mut self, group_index: usize) -> Result<Vec<usize>> {
        let group = self
            .groups
            .get_mut(group_index)
            .ok_or_else(|| PermsError::GroupNotFound(group_index.to_string()))?;
        group.revoked = true;

        let mut revoked = Vec::new();
        for index in 1..self.members.len() {
            let member = &mut self.members[index];
            let before = member.groups.len();
            member.groups.retain(|g| *g != group_index);
            if before != member.groups.len()
                && member.only_in_groups
                && member.groups.is_empty()
                && !member.status.is_revoked()
            {
                revoked.push(index);
            }
        }
        for index in &revoked {
            self.revoke_member(*index)?;
        }
        Ok(revoked)
    }

    /// Whether a recipient still takes part in the sharing.
    pub fn has_active_recipients(&self) -> bool {
        self.members
            .iter()
            .skip(1)
            .any(|m| !m.status.is_revoked())
    }

    /// Members replication should reach from this instance.
    pub fn ready_members(&self) -> Vec<usize> {
        if !self.active {
            return Vec::new();
        }
        if self.owner {
            (1..self.members.len())
                .filter(|i| self.members[*i].status == MemberStatus::Ready)
                .collect()
        } else {
            vec![0]
        }
    }

    /// Whether writes coming from this member must be refused.
    pub fn is_read_only_for(&self, index: usize) -> bool {
        if self.owner {
            return self.members.get(index).map_or(true, |m| m.read_only);
        }
        false
    }

    /// Whether this instance may only receive changes.
    pub fn is_read_only_here(&self, instance_url: &str) -> bool {
        match self.self_index(instance_url) {
            Some(0) => false,
            Some(index) => self.members[index].read_only,
            None => true,
        }
    }

    // Credentials

    fn credentials_index(&self, member_index: usize) -> Option<usize> {
        if self.owner {
            member_index.checked_sub(1)
        } else if member_index == 0 {
            Some(0)
        } else {
            None
        }
    }

    /// Credentials shared with a member.
    pub fn credentials_for(&self, member_index: usize) -> Option<&Credentials> {
        let index = self.credentials_index(member_index)?;
        self.credentials.get(index)
    }

    pub fn credentials_for_mut(&mut self, member_index: usize) -> Option<&mut Credentials> {
        let index = self.credentials_index(member_index)?;
        self.credentials.get_mut(index)
    }

    /// The member holding this inbound access token.
    pub fn member_for_token(&self, token: &str) -> Option<usize> {
        let index = self.credentials.iter().position(|c| c.accepts(token))?;
        if self.owner {
            Some(index + 1)
        } else {
            Some(0)
        }
    }

    /// The owner-side member whose invitation carries this state token.
    pub fn member_for_state(&self, state: &str) -> Option<usize> {
        if !self.owner || state.is_empty() {
            return None;
        }
        let index = self
            .credentials
            .iter()
            .position(|c| c.state.as_deref() == Some(state))?;
        Some(index + 1)
    }

    /// Rotate the inbound access token of the member presenting this
    /// refresh token.
    pub fn refresh_inbound(&mut self, refresh_token: &str) -> Result<(usize, AccessToken)> {
        let index = self
            .credentials
            .iter()
            .position(|c| c.accepts_refresh(refresh_token))
            .ok_or_else(|| PermsError::PermissionDenied("unknown refresh token".into()))?;
        let creds = &mut self.credentials[index];
        let refreshed = AccessToken {
            access_token: crate::credentials::new_token(),
            refresh_token: refresh_token.to_string(),
        };
        creds.inbound = Some(refreshed.clone());
        let member = if self.owner { index + 1 } else { 0 };
        Ok((member, refreshed))
    }

    /// Forget every credential. Used when the sharing is deactivated.
    pub fn clear_credentials(&mut self) {
        for creds in &mut self.credentials {
            creds.clear();
        }
    }

    // Rules and previews

    /// The rule sharing a directory by id, whose target is the sharing's
    /// root directory.
    pub fn root_dir_rule(&self) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.doctype == FILES && r.selects_by_id() && !r.local)
    }

    /// Id of the sharing's root directory on this instance.
    pub fn root_dir_id(&self) -> Option<&str> {
        self.root_dir_rule()
            .and_then(|r| r.values.first())
            .map(String::as_str)
    }

    /// Index of the first rule accepting a document.
    pub fn first_matching_rule(&self, doc: &Document, ancestors: &[String]) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.accept_with_ancestors(&doc.doctype, doc, ancestors))
    }

    /// Issue preview codes for recipients with an email.
    pub fn issue_preview_codes(&mut self) {
        if self.preview_path.is_none() {
            return;
        }
        for member in self.members.iter().skip(1) {
            if member.email.is_empty() || member.status.is_revoked() {
                continue;
            }
            self.preview_codes
                .entry(member.email.to_lowercase())
                .or_insert_with(new_code);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}
