//! # Sharing
//!
//! Keeps a subset of the documents and files of several instances in sync,
//! with per-document rules, revocable trust, and file content moved apart
//! from metadata.
//!
//! ## Overview
//!
//! An owner shares documents selected by [`core::Rule`]s with recipients.
//! Once a recipient accepts, both sides track their local writes and send
//! them to each other:
//!
//! - **Replication** moves documents and directories, with their revision
//!   history, through `_revs_diff` and `_bulk_docs`
//! - **Uploads** move file metadata, and the content only when it changed
//! - **Conflicts** are settled the same way on both sides, from the
//!   revisions alone
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sharing::{EngineBuilder, EngineConfig, NewSharing};
//! use sharing::core::Rule;
//! use sharing::store::{EventBus, MemoryVfs, SqliteStore};
//! use sharing::sync::HttpTransport;
//!
//! async fn example() -> sharing::Result<()> {
//!     let events = EventBus::default();
//!     let store = Arc::new(SqliteStore::open("sharing.db")?.with_events(events.clone()));
//!     let vfs = Arc::new(MemoryVfs::new().with_events(events.clone()));
//!     let config = EngineConfig::new("https://alice.example.net", "Alice");
//!     let transport = Arc::new(HttpTransport::new(config.sync.request_timeout)?);
//!
//!     let engine = EngineBuilder::new(config, store, vfs, transport, &events).build();
//!     engine.spawn_workers()?;
//!
//!     let request = NewSharing::new("Holidays", vec![Rule::files_by_id("Holidays", "dir-id")])
//!         .with_recipient("contact-bob", false);
//!     let sharing = engine.create_sharing(request).await?;
//!     engine.invite(&sharing.id).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `sharing::core` - Documents, revision trees, rules, XOR ids
//! - `sharing::store` - Document store, VFS, tree partitioning
//! - `sharing::sync` - Tracking, replication, uploads, transports
//! - `sharing::perms` - Members, credentials, contacts

pub mod config;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod jobs;
pub mod lifecycle;
pub mod membership;
pub mod notify;
pub mod task;

// Re-export component crates
pub use sharing_core as core;
pub use sharing_perms as perms;
pub use sharing_store as store;
pub use sharing_sync as sync;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use jobs::{Job, JobKind, JobQueue};
pub use lifecycle::{NewSharing, REPLICATE_WORKER, TRACK_WORKER, UPLOAD_WORKER};
pub use notify::{Invitation, LogNotifier, MemoryNotifier, Notifier};
pub use task::{spawn_best_effort, TaskHandle};

// Re-export commonly used types
pub use sharing_core::{DocRef, Document, Rule, RuleAction, XorKey};
pub use sharing_perms::{Member, MemberStatus, Sharing};
