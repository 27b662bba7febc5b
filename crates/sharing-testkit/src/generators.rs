//! Proptest generators for property-based testing.

use proptest::prelude::*;

use sharing::core::XorKey;
use sharing::store::TreeEntry;

/// Generate a document id: 32 hex digits, with or without dashes.
pub fn doc_id() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9a-f]{32}",
        "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    ]
}

/// Generate a key of 1 to 32 nibbles.
pub fn xor_key() -> impl Strategy<Value = XorKey> {
    prop::collection::vec(0u8..16, 1..=32).prop_map(XorKey::from_nibbles)
}

/// Generate the hash part of a revision.
pub fn rev_hash() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}"
}

/// Build a chain of revisions from consecutive generations.
pub fn chain_from(first_generation: u64, hashes: &[String]) -> Vec<String> {
    hashes
        .iter()
        .enumerate()
        .map(|(i, hash)| format!("{}-{}", first_generation + i as u64, hash))
        .collect()
}

/// Generate a chain (oldest first) of up to `max_len` revisions starting at
/// generation 1.
pub fn rev_chain(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(rev_hash(), 1..=max_len.max(1)).prop_map(|hashes| chain_from(1, &hashes))
}

/// Generate two chains sharing a common prefix, then forking.
pub fn forked_chains() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    (
        prop::collection::vec(rev_hash(), 1..8),
        prop::collection::vec(rev_hash(), 1..6),
        prop::collection::vec(rev_hash(), 1..6),
    )
        .prop_map(|(common, left, right)| {
            let fork = common.len() as u64 + 1;
            let mut a = chain_from(1, &common);
            a.extend(chain_from(fork, &left));
            let mut b = chain_from(1, &common);
            b.extend(chain_from(fork, &right));
            (a, b)
        })
}

/// Generate a walked tree: a root directory, then directories and files of
/// up to `max_size` bytes.
pub fn tree_entries(max_size: u64) -> impl Strategy<Value = Vec<TreeEntry>> {
    prop::collection::vec((any::<bool>(), 0..=max_size), 0..40).prop_map(|items| {
        let mut entries = vec![TreeEntry {
            id: "root".to_string(),
            is_dir: true,
            size: 0,
        }];
        for (i, (is_dir, size)) in items.into_iter().enumerate() {
            entries.push(TreeEntry {
                id: format!("entry-{}", i),
                is_dir,
                size: if is_dir { 0 } else { size },
            });
        }
        entries
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use sharing::core::{detect_conflict, xor_id, RevsTree};
    use sharing::store::{list_all_buckets, BucketItem};

    proptest! {
        #[test]
        fn xor_is_reversible_and_keeps_dashes(id in doc_id(), key in xor_key()) {
            let xored = xor_id(&id, &key);
            prop_assert_eq!(xored.len(), id.len());
            for (a, b) in id.chars().zip(xored.chars()) {
                prop_assert_eq!(a == '-', b == '-');
            }
            prop_assert_eq!(xor_id(&xored, &key), id);
        }

        #[test]
        fn chain_builds_a_well_formed_tree(chain in rev_chain(20)) {
            let tree = RevsTree::from_chain(&chain).unwrap();
            prop_assert!(tree.is_well_formed());
            prop_assert_eq!(tree.winner(), chain.last().unwrap().as_str());
            prop_assert_eq!(tree.chain_to(tree.winner()).unwrap(), chain);
        }

        #[test]
        fn conflicts_are_settled_the_same_way_on_both_sides((a, b) in forked_chains()) {
            let head_a = a.last().unwrap().clone();
            let head_b = b.last().unwrap().clone();
            prop_assume!(head_a != head_b);

            let b_wins_on_a = detect_conflict(&head_a, &b).is_won();
            let a_wins_on_b = detect_conflict(&head_b, &a).is_won();
            prop_assert!(b_wins_on_a != a_wins_on_b);

            let mut on_a = RevsTree::from_chain(&a).unwrap();
            on_a.insert_chain(&b);
            let mut on_b = RevsTree::from_chain(&b).unwrap();
            on_b.insert_chain(&a);
            prop_assert!(on_a.is_well_formed());
            prop_assert!(on_a.contains(&head_a) && on_a.contains(&head_b));
            prop_assert_eq!(on_a.winner(), on_b.winner());
            let expected = if b_wins_on_a { &head_b } else { &head_a };
            prop_assert_eq!(on_a.winner(), expected.as_str());
        }

        #[test]
        fn buckets_cover_every_byte_once(entries in tree_entries(5000), max in 1u64..4000) {
            let buckets = list_all_buckets(&entries, max);
            prop_assert!(!buckets.is_empty());

            let mut covered: HashMap<&str, u64> = HashMap::new();
            let mut dirs = 0;
            for bucket in &buckets {
                let mut fill = 0u64;
                for item in bucket {
                    match item {
                        BucketItem::Dir { .. } => dirs += 1,
                        BucketItem::FileRange { id, offset, len } => {
                            let seen = covered.entry(id.as_str()).or_default();
                            prop_assert_eq!(*seen, *offset);
                            *seen += *len;
                            fill += *len;
                        }
                    }
                }
                prop_assert!(fill <= max);
            }

            prop_assert_eq!(dirs, entries.iter().filter(|e| e.is_dir).count());
            for entry in entries.iter().filter(|e| !e.is_dir) {
                prop_assert_eq!(covered.get(entry.id.as_str()).copied().unwrap_or(0), entry.size);
            }
        }
    }
}
