//! Conflict classification for incoming revisions.

use crate::error::CoreError;
use crate::revision::{rev_generation, rev_hash};
use crate::xor::{nibbles_of, xor_nibbles};

/// Outcome of comparing the local revision with an incoming chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictStatus {
    /// The local revision is part of the incoming chain.
    NoConflict,
    /// The incoming chain wins; it is applied.
    WonConflict,
    /// The local revision wins; the incoming write is discarded.
    LostConflict,
}

impl ConflictStatus {
    pub fn is_no_conflict(&self) -> bool {
        matches!(self, ConflictStatus::NoConflict)
    }

    pub fn is_won(&self) -> bool {
        matches!(self, ConflictStatus::WonConflict)
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, ConflictStatus::LostConflict)
    }
}

/// Classify an incoming chain (oldest first) against the local revision.
///
/// The incoming head wins when it has a higher generation than the local
/// revision, or the same generation and a greater revision string.
pub fn detect_conflict(current: &str, chain: &[String]) -> ConflictStatus {
    let Some(last) = chain.last() else {
        return ConflictStatus::NoConflict;
    };
    if chain.iter().any(|rev| rev == current) {
        return ConflictStatus::NoConflict;
    }
    match rev_generation(current).cmp(&rev_generation(last)) {
        std::cmp::Ordering::Less => ConflictStatus::WonConflict,
        std::cmp::Ordering::Greater => ConflictStatus::LostConflict,
        std::cmp::Ordering::Equal if current < last.as_str() => ConflictStatus::WonConflict,
        std::cmp::Ordering::Equal => ConflictStatus::LostConflict,
    }
}

/// Identifier for a conflict copy of a document, derived from its revision.
pub fn conflict_id(id: &str, rev: &str) -> String {
    xor_nibbles(id, &nibbles_of(rev_hash(rev)))
}

/// Highest `(n)` suffix tried before giving up on a name.
pub const MAX_CONFLICT_SUFFIX: u64 = 1000;

/// A free name for a conflict copy: `base (n).ext`.
///
/// An existing `(n)` suffix is incremented rather than stacked. `taken`
/// reports whether a name is already used in the target directory.
pub fn conflict_name(
    name: &str,
    is_file: bool,
    taken: impl Fn(&str) -> bool,
) -> Result<String, CoreError> {
    let (mut base, ext) = if is_file {
        split_extension(name)
    } else {
        (name, "")
    };
    let mut n: u64 = 2;
    if let Some(stripped) = base.strip_suffix(')') {
        if let Some(idx) = stripped.rfind(" (") {
            if let Ok(num) = stripped[idx + 2..].parse::<u64>() {
                n = num + 1;
                base = &base[..idx];
            }
        }
    }
    let first = n;
    while n <= first.max(MAX_CONFLICT_SUFFIX) {
        let candidate = format!("{} ({}){}", base, n, ext);
        if !taken(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
    Err(CoreError::NameExhausted(name.to_string()))
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}
