//! Address book lookups.
//!
//! Recipients are designated by contact or contact group ids. The
//! [`ContactBook`] trait resolves them; [`StoreContactBook`] reads them from
//! the document store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sharing_core::consts::{CONTACTS, GROUPS};
use sharing_store::{DocumentStore, Selector};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEmail {
    pub address: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCozy {
    pub url: String,
    #[serde(default)]
    pub primary: bool,
}

/// A contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub email: Vec<ContactEmail>,
    #[serde(default)]
    pub cozy: Vec<ContactCozy>,
    /// Ids of the contact groups this contact belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Contact {
    pub fn primary_email(&self) -> Option<String> {
        self.email
            .iter()
            .find(|e| e.primary)
            .or_else(|| self.email.first())
            .map(|e| e.address.clone())
    }

    pub fn primary_cozy_url(&self) -> Option<String> {
        self.cozy
            .iter()
            .find(|c| c.primary)
            .or_else(|| self.cozy.first())
            .map(|c| c.url.clone())
    }
}

/// A contact group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroup {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// Resolves recipients.
#[async_trait]
pub trait ContactBook: Send + Sync {
    async fn contact(&self, id: &str) -> Result<Option<Contact>>;

    async fn group(&self, id: &str) -> Result<Option<ContactGroup>>;

    /// Contacts belonging to a group.
    async fn group_members(&self, group_id: &str) -> Result<Vec<Contact>>;
}

/// Contacts and groups stored as documents.
pub struct StoreContactBook<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> StoreContactBook<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore> ContactBook for StoreContactBook<S> {
    async fn contact(&self, id: &str) -> Result<Option<Contact>> {
        match self.store.get_doc(CONTACTS, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn group(&self, id: &str) -> Result<Option<ContactGroup>> {
        match self.store.get_doc(GROUPS, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<Contact>> {
        let docs = self
            .store
            .find(CONTACTS, &Selector::eq("groups", group_id))
            .await?;
        let mut contacts = Vec::with_capacity(docs.len());
        for doc in docs {
            contacts.push(doc.decode()?);
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sharing_core::Document;
    use sharing_store::MemoryStore;

    #[tokio::test]
    async fn test_lookup_contacts_and_groups() {
        let store = Arc::new(MemoryStore::new());
        for value in [
            json!({"_id": "bob", "fullname": "Bob", "email": [{"address": "bob@example.net"}], "groups": ["friends"]}),
            json!({"_id": "carol", "fullname": "Carol", "cozy": [{"url": "https://carol.example.net", "primary": true}], "groups": ["friends"]}),
            json!({"_id": "dave", "fullname": "Dave"}),
        ] {
            let mut doc = Document::from_value(CONTACTS, value).unwrap();
            store.create_doc(&mut doc).await.unwrap();
        }
        let mut group =
            Document::from_value(GROUPS, json!({"_id": "friends", "name": "Friends"})).unwrap();
        store.create_doc(&mut group).await.unwrap();

        let book = StoreContactBook::new(store);
        let bob = book.contact("bob").await.unwrap().unwrap();
        assert_eq!(bob.primary_email().as_deref(), Some("bob@example.net"));
        assert!(book.contact("nobody").await.unwrap().is_none());

        let friends = book.group("friends").await.unwrap().unwrap();
        assert_eq!(friends.name, "Friends");
        let members = book.group_members("friends").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[1].primary_cozy_url().as_deref(),
            Some("https://carol.example.net")
        );
    }
}
