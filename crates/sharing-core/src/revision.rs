//! Revision trees: the known lineage of one document.
//!
//! A revision is a string `N-hash` where `N` is its generation. Each node of
//! the tree may fan out into several branches when two instances wrote the
//! same document concurrently. The leftmost branch is the main line.
//!
//! Every child's generation is exactly its parent's generation + 1. The
//! operations below keep that invariant even for out-of-order input.

use serde::{Deserialize, Serialize};

/// Maximal depth kept for a tree. Deeper trees drop their oldest
/// single-branch prefix.
pub const MAX_DEPTH: usize = 100;

/// The generation of a revision: its integer prefix, or 0 when malformed.
pub fn rev_generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

/// The hash part of a revision (everything after the first `-`).
pub fn rev_hash(rev: &str) -> &str {
    rev.split_once('-').map(|(_, hash)| hash).unwrap_or(rev)
}

/// Build a new revision of the given generation from the document content.
pub fn new_rev(generation: u64, content: &[u8]) -> String {
    let hash = blake3::hash(content);
    format!("{}-{}", generation, &hash.to_hex()[..32])
}

/// Keep only the trailing part of a chain whose generations are consecutive.
pub fn contiguous_suffix(chain: &[String]) -> &[String] {
    let mut start = chain.len().saturating_sub(1);
    while start > 0 {
        let prev = rev_generation(&chain[start - 1]);
        if prev == 0 || prev + 1 != rev_generation(&chain[start]) {
            break;
        }
        start -= 1;
    }
    &chain[start..]
}

/// A tree of revisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevsTree {
    pub rev: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<RevsTree>,
}

impl RevsTree {
    /// A tree holding a single revision.
    pub fn new(rev: impl Into<String>) -> Self {
        Self {
            rev: rev.into(),
            branches: Vec::new(),
        }
    }

    /// Build a linear tree from a chain (oldest first).
    pub fn from_chain(chain: &[String]) -> Option<Self> {
        let chain = contiguous_suffix(chain);
        let mut iter = chain.iter().rev();
        let mut tree = RevsTree::new(iter.next()?.clone());
        for rev in iter {
            tree = RevsTree {
                rev: rev.clone(),
                branches: vec![tree],
            };
        }
        Some(tree)
    }

    /// Highest generation in the tree.
    pub fn generation(&self) -> u64 {
        self.branches
            .iter()
            .map(RevsTree::generation)
            .max()
            .unwrap_or(0)
            .max(rev_generation(&self.rev))
    }

    /// Number of nodes on the longest path from the root.
    pub fn depth(&self) -> usize {
        1 + self.branches.iter().map(RevsTree::depth).max().unwrap_or(0)
    }

    /// Find a revision, with its depth (the root is at depth 1).
    pub fn find(&self, rev: &str) -> Option<(&RevsTree, usize)> {
        self.find_at(rev, 1)
    }

    fn find_at(&self, rev: &str, depth: usize) -> Option<(&RevsTree, usize)> {
        if self.rev == rev {
            return Some((self, depth));
        }
        self.branches.iter().find_map(|b| b.find_at(rev, depth + 1))
    }

    fn find_mut(&mut self, rev: &str) -> Option<&mut RevsTree> {
        if self.rev == rev {
            return Some(self);
        }
        self.branches.iter_mut().find_map(|b| b.find_mut(rev))
    }

    pub fn contains(&self, rev: &str) -> bool {
        self.find(rev).is_some()
    }

    /// The tip of the leftmost branch.
    pub fn main_tip(&self) -> &RevsTree {
        let mut node = self;
        while let Some(first) = node.branches.first() {
            node = first;
        }
        node
    }

    fn main_tip_mut(&mut self) -> &mut RevsTree {
        let mut node = self;
        while !node.branches.is_empty() {
            node = &mut node.branches[0];
        }
        node
    }

    /// The node of the main line with the given generation.
    fn main_line_node_mut(&mut self, generation: u64) -> Option<&mut RevsTree> {
        let mut node = self;
        loop {
            if rev_generation(&node.rev) == generation {
                return Some(node);
            }
            if node.branches.is_empty() {
                return None;
            }
            node = &mut node.branches[0];
        }
    }

    /// Revisions of every leaf, left to right.
    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.branches.is_empty() {
            out.push(&self.rev);
        }
        for branch in &self.branches {
            branch.collect_leaves(out);
        }
    }

    /// The winning leaf: highest generation, ties broken by raw string order.
    pub fn winner(&self) -> &str {
        self.leaves()
            .into_iter()
            .max_by(|a, b| {
                rev_generation(a)
                    .cmp(&rev_generation(b))
                    .then_with(|| a.cmp(b))
            })
            .unwrap_or(&self.rev)
    }

    /// Chain from the root to the given revision, oldest first.
    pub fn chain_to(&self, rev: &str) -> Option<Vec<String>> {
        if self.rev == rev {
            return Some(vec![self.rev.clone()]);
        }
        self.branches.iter().find_map(|b| {
            b.chain_to(rev).map(|mut chain| {
                chain.insert(0, self.rev.clone());
                chain
            })
        })
    }

    /// Append a revision to the main line.
    ///
    /// A revision older than the main tip becomes a conflict branch under its
    /// parent generation, and a revision skipping generations restarts the
    /// tree at that revision.
    pub fn add(&mut self, rev: &str) {
        if self.contains(rev) {
            return;
        }
        let generation = rev_generation(rev);
        let tip_generation = rev_generation(&self.main_tip().rev);
        if generation == tip_generation + 1 {
            self.main_tip_mut().branches.push(RevsTree::new(rev));
        } else if generation > tip_generation + 1 {
            *self = RevsTree::new(rev);
            return;
        } else {
            let parent = match generation.checked_sub(1) {
                Some(g) => self.main_line_node_mut(g),
                None => None,
            };
            let Some(parent) = parent else {
                return;
            };
            parent.branches.push(RevsTree::new(rev));
        }
        self.compact();
    }

    /// Attach a revision under an explicit parent.
    ///
    /// Falls back to [`RevsTree::add`] when the parent is unknown or is not
    /// of the previous generation.
    pub fn insert_after(&mut self, rev: &str, parent: &str) {
        if self.contains(rev) {
            return;
        }
        let attaches = self
            .find(parent)
            .is_some_and(|(node, _)| rev_generation(rev) == rev_generation(&node.rev) + 1);
        if !attaches {
            self.add(rev);
            return;
        }
        if let Some(node) = self.find_mut(parent) {
            node.branches.push(RevsTree::new(rev));
        }
        self.compact();
    }

    /// Merge a full lineage (oldest first).
    ///
    /// The deepest revision of the chain already in the tree is the anchor;
    /// the rest of the chain is grafted below it. Without overlap, the chain
    /// hangs under the main-line node of the previous generation, or replaces
    /// the tree when it is newer than anything known.
    pub fn insert_chain(&mut self, chain: &[String]) {
        let chain = contiguous_suffix(chain);
        let Some(first) = chain.first() else {
            return;
        };

        let (anchor, rest) = match chain.iter().rposition(|rev| self.contains(rev)) {
            Some(i) => (chain[i].clone(), &chain[i + 1..]),
            None => {
                let anchor = match rev_generation(first).checked_sub(1) {
                    Some(g) => self.main_line_node_mut(g).map(|node| node.rev.clone()),
                    None => None,
                };
                match anchor {
                    Some(anchor) => (anchor, chain),
                    None => {
                        let newest = chain.last().map(|r| rev_generation(r)).unwrap_or(0);
                        if newest > self.generation() {
                            if let Some(tree) = RevsTree::from_chain(chain) {
                                *self = tree;
                                self.compact();
                            }
                        }
                        return;
                    }
                }
            }
        };

        if let Some(mut node) = self.find_mut(&anchor) {
            for rev in rest {
                let pos = match node.branches.iter().position(|b| b.rev == *rev) {
                    Some(pos) => pos,
                    None => {
                        node.branches.push(RevsTree::new(rev.clone()));
                        node.branches.len() - 1
                    }
                };
                node = &mut node.branches[pos];
            }
        }
        self.compact();
    }

    /// Drop the oldest single-branch prefix while the tree is too deep.
    fn compact(&mut self) {
        while self.depth() > MAX_DEPTH && self.branches.len() == 1 {
            match self.branches.pop() {
                Some(child) => *self = child,
                None => break,
            }
        }
    }

    /// Check that every child is exactly one generation after its parent.
    pub fn is_well_formed(&self) -> bool {
        let generation = rev_generation(&self.rev);
        self.branches
            .iter()
            .all(|b| rev_generation(&b.rev) == generation + 1 && b.is_well_formed())
    }
}
