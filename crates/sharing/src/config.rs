//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sharing_sync::SyncConfig;

/// Configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Public URL of this instance.
    pub instance_url: String,
    /// Name shown to the other members.
    pub public_name: String,
    /// Replication and upload configuration.
    pub sync: SyncConfig,
    /// Delay before a replication or upload round following a local write.
    /// Writes arriving meanwhile join the same round.
    pub replicate_debounce: Duration,
    /// Delay before the member list is sent to the recipients.
    pub notify_delay: Duration,
    /// Longest a single round may take.
    pub round_timeout: Duration,
    /// Number of workers started by `spawn_workers`.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            public_name: String::new(),
            sync: SyncConfig::default(),
            replicate_debounce: Duration::from_secs(5),
            notify_delay: Duration::from_secs(1),
            round_timeout: Duration::from_secs(300),
            workers: 2,
        }
    }
}

impl EngineConfig {
    pub fn new(instance_url: impl Into<String>, public_name: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into(),
            public_name: public_name.into(),
            ..Default::default()
        }
    }

    /// No delays: everything queued runs on the next drain.
    pub fn immediate(mut self) -> Self {
        self.replicate_debounce = Duration::ZERO;
        self.notify_delay = Duration::ZERO;
        self
    }
}
