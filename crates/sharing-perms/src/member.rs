//! Members and groups of a sharing.

use serde::{Deserialize, Serialize};

/// Lifecycle of a member.
///
/// ```text
/// mail-not-sent → pending → seen → ready → revoked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberStatus {
    /// The sharer (member 0).
    Owner,
    /// Added, but the invitation has not been delivered yet.
    MailNotSent,
    /// Invited.
    Pending,
    /// The recipient opened the invitation.
    Seen,
    /// The recipient accepted; replication can flow.
    Ready,
    /// Left or removed. Members are never deleted.
    Revoked,
}

impl MemberStatus {
    pub fn is_revoked(&self) -> bool {
        matches!(self, MemberStatus::Revoked)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A participant of a sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub status: MemberStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Base URL of the member's instance, once known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    /// The member was added through groups only, and leaves with them.
    #[serde(default, skip_serializing_if = "is_false")]
    pub only_in_groups: bool,
    /// Indices into the sharing's groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<usize>,
}

impl Member {
    pub fn new(status: MemberStatus) -> Self {
        Self {
            status,
            name: String::new(),
            public_name: String::new(),
            email: String::new(),
            instance: String::new(),
            read_only: false,
            only_in_groups: false,
            groups: Vec::new(),
        }
    }

    /// The owner entry of a new sharing.
    pub fn owner(instance: impl Into<String>, public_name: impl Into<String>) -> Self {
        let mut member = Self::new(MemberStatus::Owner);
        member.instance = normalize_instance(&instance.into());
        member.public_name = public_name.into();
        member
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = normalize_instance(&instance.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Name to show for this member.
    pub fn display_name(&self) -> &str {
        [&self.public_name, &self.name, &self.email, &self.instance]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Whether two entries designate the same person: same instance, or
    /// same email when an instance is unknown.
    pub fn same_person(&self, other: &Member) -> bool {
        if !self.instance.is_empty() && !other.instance.is_empty() {
            return self.instance == other.instance;
        }
        !self.email.is_empty() && self.email.eq_ignore_ascii_case(&other.email)
    }
}

/// A contact group added to a sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Id of the contact group.
    pub id: String,
    pub name: String,
    /// Index of the member who added the group.
    pub added_by: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub revoked: bool,
}

/// Instance URLs are compared without a trailing slash.
pub fn normalize_instance(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_value(MemberStatus::MailNotSent).unwrap();
        assert_eq!(json, "mail-not-sent");
        let back: MemberStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, MemberStatus::MailNotSent);
    }

    #[test]
    fn test_same_person() {
        let a = Member::new(MemberStatus::Pending).with_email("Bob@example.net");
        let b = Member::new(MemberStatus::Pending).with_email("bob@example.net");
        assert!(a.same_person(&b));

        let c = a.clone().with_instance("https://bob.example.net/");
        let d = b.clone().with_instance("https://other.example.net");
        assert!(!c.same_person(&d));
        assert_eq!(c.instance, "https://bob.example.net");
    }

    #[test]
    fn test_display_name() {
        let m = Member::new(MemberStatus::Pending).with_email("a@b.c");
        assert_eq!(m.display_name(), "a@b.c");
        let m = m.with_name("Alice");
        assert_eq!(m.display_name(), "Alice");
    }
}
