//! # Sharing Testkit
//!
//! Testing utilities for the sharing engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Instances wired to an in-memory network, ready to share
//! - **Generators**: Proptest strategies for ids, keys, revisions and trees
//!
//! ## Test Fixtures
//!
//! Share a directory between two instances and let them converge:
//!
//! ```rust,no_run
//! use sharing_testkit::fixtures::Pair;
//!
//! # async fn example() -> sharing::Result<()> {
//! let pair = Pair::new();
//! let (sharing, dir) = pair.share_dir("Holidays", false).await?;
//! pair.alice.write_file("beach.jpg", &dir.id, b"...").await?;
//! pair.settle().await?;
//!
//! let bob_root = pair.bob_root(&sharing.id).await?;
//! assert_eq!(pair.alice.tree(&dir.id).await?, pair.bob.tree(&bob_root).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use sharing::core::xor_id;
//! use sharing_testkit::generators::{doc_id, xor_key};
//!
//! proptest! {
//!     #[test]
//!     fn xor_is_reversible(id in doc_id(), key in xor_key()) {
//!         prop_assert_eq!(xor_id(&xor_id(&id, &key), &key), id);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, Pair, TestEngine, TestInstance};
pub use generators::{doc_id, forked_chains, rev_chain, tree_entries, xor_key};
