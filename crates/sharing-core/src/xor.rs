//! XOR identifiers.
//!
//! File identifiers are obfuscated with a per-member key before they cross
//! the trust boundary. Each hexadecimal character is XORed with one nibble of
//! the key; every other character (such as `-`) is kept as is. Applying the
//! same key twice gives back the original identifier.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes behind a key. Each byte gives two nibbles.
pub const XOR_KEY_BYTES: usize = 8;

/// A key made of nibbles (values in `0..16`).
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct XorKey(Vec<u8>);

impl XorKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut random = [0u8; XOR_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut random);
        Self::from_packed(&random)
    }

    /// Build a key from packed bytes, two nibbles per byte.
    pub fn from_packed(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte & 0xf);
            nibbles.push(byte >> 4);
        }
        Self(nibbles)
    }

    /// Build a key from raw nibbles. Values are masked to 4 bits.
    pub fn from_nibbles(nibbles: impl IntoIterator<Item = u8>) -> Self {
        Self(nibbles.into_iter().map(|n| n & 0xf).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_nibbles(&self) -> &[u8] {
        &self.0
    }

    fn to_packed(&self) -> Vec<u8> {
        self.0
            .chunks(2)
            .map(|pair| pair[0] | pair.get(1).copied().unwrap_or(0) << 4)
            .collect()
    }
}

impl fmt::Debug for XorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XorKey({} nibbles)", self.0.len())
    }
}

impl From<XorKey> for String {
    fn from(key: XorKey) -> Self {
        hex::encode(key.to_packed())
    }
}

impl TryFrom<String> for XorKey {
    type Error = hex::FromHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(Self::from_packed(&hex::decode(s)?))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_char(v: u8) -> u8 {
    if v < 10 {
        b'0' + v
    } else {
        b'a' + v - 10
    }
}

/// Transform an identifier with a key made of nibbles.
///
/// Uppercase hexadecimal characters come out lowercase.
pub fn xor_nibbles(id: &str, key: &[u8]) -> String {
    if key.is_empty() {
        return id.to_string();
    }
    let out: Vec<u8> = id
        .bytes()
        .enumerate()
        .map(|(i, c)| match hex_value(c) {
            Some(v) => hex_char((v ^ key[i % key.len()]) & 0xf),
            None => c,
        })
        .collect();
    // Only ASCII hex digits are replaced, by ASCII hex digits.
    String::from_utf8(out).unwrap_or_else(|_| id.to_string())
}

/// Transform an identifier with a member's key.
pub fn xor_id(id: &str, key: &XorKey) -> String {
    xor_nibbles(id, key.as_nibbles())
}

/// Nibbles of the hexadecimal characters of a string (others count as 0).
pub fn nibbles_of(s: &str) -> Vec<u8> {
    s.bytes().map(|c| hex_value(c).unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_xor_known_value() {
        let key = XorKey::from_nibbles([1, 2, 3]);
        assert_eq!(xor_id("000-fff", &key), "123-dce");
    }

    #[test]
    fn test_empty_key_is_identity() {
        assert_eq!(xor_id("abc", &XorKey::default()), "abc");
    }

    #[test]
    fn test_key_serde_roundtrip() {
        let key = XorKey::generate();
        assert_eq!(key.as_nibbles().len(), XOR_KEY_BYTES * 2);
        assert!(key.as_nibbles().iter().all(|n| *n < 16));
        let json = serde_json::to_string(&key).unwrap();
        let back: XorKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_uppercase_normalized() {
        let key = XorKey::from_nibbles([0]);
        assert_eq!(xor_id("ABC", &key), "abc");
    }

    proptest! {
        #[test]
        fn test_xor_reversible(id in "[0-9a-f-]{1,40}", bytes in any::<[u8; 8]>()) {
            let key = XorKey::from_packed(&bytes);
            let once = xor_id(&id, &key);
            prop_assert_eq!(xor_id(&once, &key), id.clone());
            for (a, b) in id.chars().zip(once.chars()) {
                prop_assert_eq!(a == '-', b == '-');
            }
        }
    }
}
