//! # Sharing Store
//!
//! Storage abstraction for the sharing engine: the document database and the
//! virtual file system the engine replicates, behind traits.
//!
//! ## Key Types
//!
//! - [`DocumentStore`] - The async trait for document persistence
//! - [`Vfs`] - The async trait for files and directories
//! - [`SqliteStore`] - SQLite-based document storage
//! - [`MemoryStore`] / [`MemoryVfs`] - In-memory implementations for tests
//! - [`EventBus`] - Local writes, as they happen
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sharing_store::{DocumentStore, SqliteStore};
//! use sharing_core::Document;
//!
//! async fn example() {
//!     let store = SqliteStore::open("sharing.db").unwrap();
//!     let mut doc = Document::new("io.cozy.notes", "");
//!     doc.set("title", "groceries");
//!     store.create_doc(&mut doc).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Revisions**: every write assigns `N-hash`, with `N` growing by one
//! - **Tombstones**: deletions keep the document id and its history
//! - **Changes feed**: each document appears once, at its latest sequence

pub mod error;
pub mod events;
pub mod file;
pub mod memory;
pub mod migration;
pub mod partition;
pub mod sqlite;
pub mod traits;
pub mod vfs;

pub use error::{Result, StoreError};
pub use events::{Event, EventBus};
pub use file::{checksum, FileDoc, FileKind};
pub use memory::MemoryStore;
pub use partition::{list_all_buckets, list_bucket, split_into_buckets, walk_tree, BucketItem, PartCursor, TreeEntry};
pub use sqlite::SqliteStore;
pub use traits::{Change, ChangesFeed, DocumentStore, Selector, Vfs};
pub use vfs::MemoryVfs;
