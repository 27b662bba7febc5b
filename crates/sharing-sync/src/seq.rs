//! Replication cursors.
//!
//! Each (sharing, member, worker) triple remembers how far it read the
//! shared feed. Cursors only move forward.

use serde_json::Value;

use sharing_core::consts::SHARINGS_CURSORS;
use sharing_core::Document;
use sharing_store::traits::parse_seq;
use sharing_store::{DocumentStore, Vfs};

use crate::context::SyncContext;
use crate::error::Result;

/// Cursor of the replicator.
pub const REPLICATOR: &str = "replicator";

/// Cursor of the uploader.
pub const UPLOADER: &str = "upload";

pub fn cursor_id(sharing_id: &str, member: usize, worker: &str) -> String {
    format!("sharing-{}-{}/{}", sharing_id, member, worker)
}

fn cursor_prefix(sharing_id: &str) -> String {
    format!("sharing-{}-", sharing_id)
}

impl<S: DocumentStore, V: Vfs> SyncContext<S, V> {
    /// The last sequence a worker processed, or the empty string.
    pub async fn get_last_seq(&self, sharing_id: &str, member: usize, worker: &str) -> Result<String> {
        let id = cursor_id(sharing_id, member, worker);
        let doc = self.store.get_doc(SHARINGS_CURSORS, &id).await?;
        Ok(doc
            .and_then(|d| d.get_str("last_seq").map(String::from))
            .unwrap_or_default())
    }

    /// Move a cursor forward. A sequence at or before the stored one is
    /// ignored.
    pub async fn update_last_seq(
        &self,
        sharing_id: &str,
        member: usize,
        worker: &str,
        seq: &str,
    ) -> Result<()> {
        if seq.is_empty() {
            return Ok(());
        }
        let id = cursor_id(sharing_id, member, worker);
        match self.store.get_doc(SHARINGS_CURSORS, &id).await? {
            Some(mut doc) => {
                let current = doc.get_str("last_seq").unwrap_or_default();
                if parse_seq(seq) <= parse_seq(current) {
                    return Ok(());
                }
                doc.set("last_seq", Value::String(seq.to_string()));
                self.store.update_doc(&mut doc).await?;
            }
            None => {
                let mut doc = Document::new(SHARINGS_CURSORS, id);
                doc.set("last_seq", Value::String(seq.to_string()));
                self.store.create_doc(&mut doc).await?;
            }
        }
        Ok(())
    }

    /// Forget the cursors of a sharing, or of one of its members.
    pub async fn clear_last_seqs(&self, sharing_id: &str, member: Option<usize>) -> Result<usize> {
        let prefix = cursor_prefix(sharing_id);
        let member_prefix = member.map(|m| format!("{}{}/", prefix, m));
        let mut cleared = 0;
        for doc in self.store.all_docs(SHARINGS_CURSORS).await? {
            let matches = match &member_prefix {
                Some(p) => doc.id.starts_with(p.as_str()),
                None => doc.id.starts_with(&prefix),
            };
            if matches {
                self.store.delete_doc(&doc).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let ctx = context("https://alice.example.net");
        assert_eq!(ctx.get_last_seq("s1", 1, REPLICATOR).await.unwrap(), "");

        ctx.update_last_seq("s1", 1, REPLICATOR, "5-abc").await.unwrap();
        ctx.update_last_seq("s1", 1, REPLICATOR, "3-def").await.unwrap();
        assert_eq!(ctx.get_last_seq("s1", 1, REPLICATOR).await.unwrap(), "5-abc");

        ctx.update_last_seq("s1", 1, REPLICATOR, "7-ghi").await.unwrap();
        assert_eq!(ctx.get_last_seq("s1", 1, REPLICATOR).await.unwrap(), "7-ghi");
        assert_eq!(ctx.get_last_seq("s1", 1, UPLOADER).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_clear_cursors() {
        let ctx = context("https://alice.example.net");
        ctx.update_last_seq("s1", 1, REPLICATOR, "1-a").await.unwrap();
        ctx.update_last_seq("s1", 1, UPLOADER, "1-a").await.unwrap();
        ctx.update_last_seq("s1", 2, REPLICATOR, "1-a").await.unwrap();
        ctx.update_last_seq("s10", 1, REPLICATOR, "1-a").await.unwrap();

        assert_eq!(ctx.clear_last_seqs("s1", Some(1)).await.unwrap(), 2);
        assert_eq!(ctx.get_last_seq("s1", 2, REPLICATOR).await.unwrap(), "1-a");
        assert_eq!(ctx.clear_last_seqs("s1", None).await.unwrap(), 1);
        assert_eq!(ctx.get_last_seq("s10", 1, REPLICATOR).await.unwrap(), "1-a");
    }
}
