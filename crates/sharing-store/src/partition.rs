//! Splitting a directory tree into buckets of bounded byte size.
//!
//! A bucket is described by the cursor where it starts; it ends where the
//! next one starts. Large files are cut across buckets by byte range, so
//! that concatenating every bucket's listing touches each file byte and
//! each directory exactly once.

use crate::error::Result;
use crate::traits::Vfs;

/// One file or directory of a walked tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub id: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Start of a bucket: an index into the walked entries and a byte offset
/// inside that entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartCursor {
    pub entry: usize,
    pub offset: u64,
}

/// One item of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketItem {
    Dir { id: String },
    FileRange { id: String, offset: u64, len: u64 },
}

/// Walk a tree, every directory before its children. The root comes first.
pub async fn walk_tree<V: Vfs + ?Sized>(vfs: &V, root_id: &str) -> Result<Vec<TreeEntry>> {
    let mut entries = vec![TreeEntry {
        id: root_id.to_string(),
        is_dir: true,
        size: 0,
    }];
    let mut stack = vec![root_id.to_string()];
    while let Some(dir) = stack.pop() {
        let mut subdirs = Vec::new();
        for child in vfs.children(&dir).await? {
            entries.push(TreeEntry {
                id: child.id.clone(),
                is_dir: child.is_dir(),
                size: if child.is_dir() { 0 } else { child.size },
            });
            if child.is_dir() {
                subdirs.push(child.id);
            }
        }
        subdirs.reverse();
        stack.extend(subdirs);
    }
    Ok(entries)
}

/// Start cursors of buckets holding at most `max` bytes each.
///
/// Directories weigh nothing. There is always at least one bucket.
pub fn split_into_buckets(entries: &[TreeEntry], max: u64) -> Vec<PartCursor> {
    let max = max.max(1);
    let mut cursors = vec![PartCursor { entry: 0, offset: 0 }];
    let mut fill = 0u64;
    for (index, entry) in entries.iter().enumerate() {
        if entry.is_dir {
            continue;
        }
        let mut offset = 0u64;
        loop {
            let remaining = entry.size - offset;
            if fill + remaining <= max {
                fill += remaining;
                break;
            }
            offset += max - fill;
            cursors.push(PartCursor {
                entry: index,
                offset,
            });
            fill = 0;
        }
    }
    cursors
}

/// List the bucket starting at `start` and ending at `end` (exclusive), or
/// at the end of the tree.
pub fn list_bucket(
    entries: &[TreeEntry],
    start: &PartCursor,
    end: Option<&PartCursor>,
) -> Vec<BucketItem> {
    let mut items = Vec::new();
    for (index, entry) in entries.iter().enumerate().skip(start.entry) {
        let stop = match end {
            Some(end) if index > end.entry => break,
            Some(end) if index == end.entry => {
                if end.offset == 0 {
                    break;
                }
                end.offset
            }
            _ => entry.size,
        };
        if entry.is_dir {
            items.push(BucketItem::Dir {
                id: entry.id.clone(),
            });
            continue;
        }
        let from = if index == start.entry { start.offset } else { 0 };
        items.push(BucketItem::FileRange {
            id: entry.id.clone(),
            offset: from,
            len: stop - from,
        });
    }
    items
}

/// List every bucket of a tree.
pub fn list_all_buckets(entries: &[TreeEntry], max: u64) -> Vec<Vec<BucketItem>> {
    let cursors = split_into_buckets(entries, max);
    cursors
        .iter()
        .enumerate()
        .map(|(i, start)| list_bucket(entries, start, cursors.get(i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileDoc;
    use crate::vfs::MemoryVfs;
    use bytes::Bytes;
    use proptest::prelude::*;
    use sharing_core::consts::ROOT_DIR_ID;

    fn dir(id: &str) -> TreeEntry {
        TreeEntry {
            id: id.into(),
            is_dir: true,
            size: 0,
        }
    }

    fn file(id: &str, size: u64) -> TreeEntry {
        TreeEntry {
            id: id.into(),
            is_dir: false,
            size,
        }
    }

    #[test]
    fn test_small_tree_is_one_bucket() {
        let entries = vec![dir("root"), file("a", 10), file("b", 20)];
        let buckets = list_all_buckets(&entries, 100);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].len(), 3);
    }

    #[test]
    fn test_large_file_is_split() {
        let entries = vec![dir("root"), file("a", 250)];
        let cursors = split_into_buckets(&entries, 100);
        assert_eq!(
            cursors,
            vec![
                PartCursor { entry: 0, offset: 0 },
                PartCursor { entry: 1, offset: 100 },
                PartCursor { entry: 1, offset: 200 },
            ]
        );
        let buckets = list_all_buckets(&entries, 100);
        assert_eq!(
            buckets[0],
            vec![
                BucketItem::Dir { id: "root".into() },
                BucketItem::FileRange { id: "a".into(), offset: 0, len: 100 },
            ]
        );
        assert_eq!(
            buckets[2],
            vec![BucketItem::FileRange { id: "a".into(), offset: 200, len: 50 }]
        );
    }

    #[test]
    fn test_exact_fit_starts_next_bucket_at_next_file() {
        let entries = vec![file("a", 100), dir("d"), file("b", 10)];
        let cursors = split_into_buckets(&entries, 100);
        assert_eq!(cursors[1], PartCursor { entry: 2, offset: 0 });
        let buckets = list_all_buckets(&entries, 100);
        assert_eq!(buckets[0].len(), 2);
        assert_eq!(
            buckets[1],
            vec![BucketItem::FileRange { id: "b".into(), offset: 0, len: 10 }]
        );
    }

    proptest! {
        #[test]
        fn prop_buckets_cover_every_byte_once(
            sizes in prop::collection::vec((any::<bool>(), 0u64..500), 0..40),
            max in 1u64..300,
        ) {
            let entries: Vec<TreeEntry> = sizes
                .iter()
                .enumerate()
                .map(|(i, (is_dir, size))| if *is_dir { dir(&i.to_string()) } else { file(&i.to_string(), *size) })
                .collect();

            let mut dirs_seen = Vec::new();
            let mut next_offset: std::collections::HashMap<String, u64> = Default::default();
            for bucket in list_all_buckets(&entries, max) {
                let bytes: u64 = bucket.iter().map(|item| match item {
                    BucketItem::FileRange { len, .. } => *len,
                    BucketItem::Dir { .. } => 0,
                }).sum();
                prop_assert!(bytes <= max);
                for item in bucket {
                    match item {
                        BucketItem::Dir { id } => dirs_seen.push(id),
                        BucketItem::FileRange { id, offset, len } => {
                            let expected = next_offset.entry(id).or_insert(0);
                            prop_assert_eq!(*expected, offset);
                            *expected += len;
                        }
                    }
                }
            }
            for entry in &entries {
                if entry.is_dir {
                    prop_assert_eq!(dirs_seen.iter().filter(|d| **d == entry.id).count(), 1);
                } else {
                    prop_assert_eq!(next_offset.get(&entry.id).copied(), Some(entry.size));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_walk_puts_directories_first() {
        let vfs = MemoryVfs::new();
        let top = vfs.create_dir(FileDoc::new_dir("top", ROOT_DIR_ID)).await.unwrap();
        let sub = vfs.create_dir(FileDoc::new_dir("sub", &top.id)).await.unwrap();
        let f = vfs
            .create_file(FileDoc::new_file("f", &sub.id), Bytes::from_static(b"12345"))
            .await
            .unwrap();

        let entries = walk_tree(&vfs, &top.id).await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![top.id.as_str(), sub.id.as_str(), f.id.as_str()]);
        assert_eq!(entries[2].size, 5);
    }
}
