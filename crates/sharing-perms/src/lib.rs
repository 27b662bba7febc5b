//! # Sharing Permissions
//!
//! Who takes part in a sharing, and how each party proves it.
//!
//! ## Overview
//!
//! A [`Sharing`] lists its members in a stable order: the owner first, then
//! every recipient ever invited. Members are revoked, never removed, so an
//! index designates the same person for the whole life of the sharing.
//!
//! ## Key Concepts
//!
//! - **Member**: a participant, with its status and read-only flag
//! - **Group**: a contact group whose contacts were added together
//! - **Credentials**: the tokens and XOR key shared with one peer
//!
//! ## Token Model
//!
//! Each side mints the bearer token the other side presents to it, and
//! checks it by equality. Refresh tokens rotate the access token without a
//! new invitation.
//!
//! ```rust,no_run
//! use sharing_perms::{Member, Sharing};
//! use sharing_core::Rule;
//!
//! let mut sharing = Sharing::new(
//!     "Holidays",
//!     vec![Rule::files_by_id("Holidays", "dir-id")],
//!     Member::owner("https://alice.example.net", "Alice"),
//! );
//! let bob = Member::new(sharing_perms::MemberStatus::MailNotSent).with_email("bob@example.net");
//! let index = sharing.add_member(bob).unwrap();
//! assert!(sharing.credentials_for(index).is_some());
//! ```

pub mod contacts;
pub mod credentials;
pub mod error;
pub mod member;
pub mod sharing;

pub use contacts::{Contact, ContactBook, ContactCozy, ContactEmail, ContactGroup, StoreContactBook};
pub use credentials::{new_code, new_token, AccessToken, Credentials, OAuthClient};
pub use error::{PermsError, Result};
pub use member::{normalize_instance, Group, Member, MemberStatus};
pub use sharing::{Sharing, Triggers};
