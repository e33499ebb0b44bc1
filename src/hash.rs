//! 256-bit hash newtype shared by share hashes, transaction hashes and ref
//! hashes. Binary storage, hex `Display`/`Debug`, dual-mode serde (hex for
//! human-readable formats, raw bytes otherwise) — the same split the
//! teacher's `network::protocol::Hash` makes for its 64-byte SHA-512 hash.

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ShareChainError;
use crate::pack::Packable;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The numeric value used for PoW/target comparisons: the hash's bytes
    /// read little-endian, matching the underlying chain's convention of
    /// comparing a reversed-byte-order hash against a target.
    pub fn to_biguint_le(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    pub fn from_biguint_le(v: &BigUint) -> Hash256 {
        let mut bytes = v.to_bytes_le();
        bytes.resize(32, 0);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[..32]);
        Hash256(arr)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            if bytes.len() != 32 {
                return Err(serde::de::Error::custom("expected 32 bytes of hex"));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            Ok(Hash256(arr))
        } else {
            let v: Vec<u8> = Deserialize::deserialize(deserializer)?;
            if v.len() != 32 {
                return Err(serde::de::Error::custom("expected 32 raw bytes"));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&v);
            Ok(Hash256(arr))
        }
    }
}

impl Packable for Hash256 {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        crate::pack::unpack_fixed_bytes::<32>(buf).map(Hash256)
    }
}

/// Double SHA-256 of `data`, returned as a [`Hash256`].
pub fn hash256(data: &[u8]) -> Hash256 {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&second);
    Hash256(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hex() {
        let h = Hash256::from_bytes([0xab; 32]);
        assert_eq!(h.to_string(), "ab".repeat(32));
    }

    #[test]
    fn biguint_roundtrip() {
        let h = hash256(b"hello");
        let n = h.to_biguint_le();
        assert_eq!(Hash256::from_biguint_le(&n), h);
    }

    #[test]
    fn pack_roundtrip() {
        let h = hash256(b"share");
        let mut out = Vec::new();
        h.pack(&mut out);
        let mut buf = out.as_slice();
        assert_eq!(Hash256::unpack(&mut buf).unwrap(), h);
    }
}
