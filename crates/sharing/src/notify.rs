//! Delivery of invitations to recipients without a known instance.
//!
//! Mail is an external service: its errors are opaque to the engine.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use sharing_perms::{Member, Sharing};

/// An invitation to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub sharing_id: String,
    pub description: String,
    pub sharer: String,
    pub email: String,
    /// Where the recipient tells us its instance.
    pub link: String,
    pub preview_code: Option<String>,
}

impl Invitation {
    pub fn new(sharing: &Sharing, member: &Member, link: String) -> Self {
        let sharer = sharing
            .members
            .first()
            .map(|m| m.display_name().to_string())
            .unwrap_or_default();
        Self {
            sharing_id: sharing.id.clone(),
            description: sharing.description.clone(),
            sharer,
            email: member.email.clone(),
            link,
            preview_code: sharing.preview_codes.get(&member.email.to_lowercase()).cloned(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_invitation(&self, invitation: Invitation) -> anyhow::Result<()>;
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_invitation(&self, invitation: Invitation) -> anyhow::Result<()> {
        info!(
            sharing_id = %invitation.sharing_id,
            email = %invitation.email,
            "invitation ready to be mailed"
        );
        Ok(())
    }
}

/// Notifier keeping invitations in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Invitation>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Invitation> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send_invitation(&self, invitation: Invitation) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("notifier poisoned: {}", e))?
            .push(invitation);
        Ok(())
    }
}
