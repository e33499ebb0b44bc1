//! Incremental double-SHA-256 midstate, letting a share commit to a full
//! coinbase transaction without carrying the bytes that come after the
//! variable per-share nonce/merkle tail.
//!
//! Capturing a SHA-256 midstate means driving the compression function one
//! 64-byte block at a time and keeping whatever didn't fill a block. `sha2`
//! exposes that primitive as `compress256`, gated behind its `compress`
//! feature; everywhere else in this crate that just wants a one-shot hash
//! uses the ordinary `Digest` API instead.

use sha2::digest::generic_array::typenum::U64;
use sha2::digest::generic_array::GenericArray;
use sha2::{compress256, Digest, Sha256};

use crate::error::ShareChainError;
use crate::pack::Packable;

const SHA256_INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// SHA-256 state after hashing some prefix, plus the tail bytes that didn't
/// fill a complete 64-byte block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLink {
    pub state: [u32; 8],
    /// Buffered tail bytes of the prefix, with the trailing `const_ending`
    /// stripped off (it is re-supplied by the caller of `check_hash_link`).
    pub extra_data: Vec<u8>,
    /// Total byte length of the prefix this link was built from.
    pub length: u64,
}

impl Default for HashLink {
    fn default() -> Self {
        HashLink {
            state: SHA256_INITIAL_STATE,
            extra_data: Vec::new(),
            length: 0,
        }
    }
}

fn feed(state: &mut [u32; 8], buffer: &mut Vec<u8>, data: &[u8]) {
    buffer.extend_from_slice(data);
    let mut offset = 0;
    while buffer.len() - offset >= 64 {
        let block: GenericArray<u8, U64> = GenericArray::clone_from_slice(&buffer[offset..offset + 64]);
        compress256(state, std::slice::from_ref(&block));
        offset += 64;
    }
    buffer.drain(0..offset);
}

/// Builds a [`HashLink`] covering `prefix`, which must end with
/// `const_ending` (the fixed bytes that precede the variable tail every
/// caller will later supply to [`check_hash_link`]).
pub fn prefix_to_hash_link(
    prefix: &[u8],
    const_ending: &[u8],
) -> Result<HashLink, ShareChainError> {
    if !prefix.ends_with(const_ending) {
        return Err(ShareChainError::invariant(
            "hash link prefix does not end with the expected constant tail",
        ));
    }

    let mut state = SHA256_INITIAL_STATE;
    let mut buffer = Vec::new();
    feed(&mut state, &mut buffer, prefix);

    let extra_data = buffer[..buffer.len() - const_ending.len()].to_vec();

    Ok(HashLink {
        state,
        extra_data,
        length: prefix.len() as u64,
    })
}

/// Continues `link` over `const_ending` (re-supplied by the caller) followed
/// by `data`, finalizes the SHA-256 digest, and returns the double-SHA-256
/// of that digest as a 256-bit hash.
pub fn check_hash_link(
    link: &HashLink,
    data: &[u8],
    const_ending: &[u8],
) -> crate::hash::Hash256 {
    let mut state = link.state;
    let mut buffer = link.extra_data.clone();
    buffer.extend_from_slice(const_ending);
    feed(&mut state, &mut buffer, data);

    let total_bits = (link.length + data.len() as u64) * 8;

    // Standard SHA-256 finalization padding.
    buffer.push(0x80);
    while buffer.len() % 64 != 56 {
        buffer.push(0);
    }
    buffer.extend_from_slice(&total_bits.to_be_bytes());
    feed(&mut state, &mut buffer, &[]);
    debug_assert!(buffer.is_empty(), "padding must land on a block boundary");

    let mut digest = [0u8; 32];
    for (i, word) in state.iter().enumerate() {
        digest[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }

    let second = Sha256::digest(digest);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    crate::hash::Hash256(out)
}

impl Packable for HashLink {
    fn pack(&self, out: &mut Vec<u8>) {
        for word in &self.state {
            out.extend_from_slice(&word.to_be_bytes());
        }
        crate::pack::pack_bytes(&self.extra_data, out);
        crate::pack::varint::pack(self.length, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        let mut state = [0u32; 8];
        for word in state.iter_mut() {
            let bytes = crate::pack::unpack_fixed_bytes::<4>(buf)?;
            *word = u32::from_be_bytes(bytes);
        }
        let extra_data = crate::pack::unpack_bytes(buf)?;
        if extra_data.len() > 63 {
            return Err(ShareChainError::peer_misbehaving(
                "hash link extra_data longer than one block",
            ));
        }
        let length = crate::pack::varint::unpack(buf)?;
        Ok(HashLink {
            state,
            extra_data,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hash link covering the whole message (no extra `data` at check
    /// time) must reproduce plain double-SHA-256.
    #[test]
    fn matches_plain_double_sha256_when_const_ending_is_the_whole_suffix() {
        let message = b"the quick brown fox jumps over the lazy dog, several times over";
        let const_ending = &message[message.len() - 10..];
        let prefix = &message[..message.len() - 0]; // whole message ends with const_ending trivially
        let link = prefix_to_hash_link(prefix, const_ending).unwrap();

        let got = check_hash_link(&link, b"", const_ending);
        let expected = crate::hash::hash256(message);
        assert_eq!(got, expected);
    }

    #[test]
    fn extra_tail_data_is_included_in_the_digest() {
        let const_ending = b"TAIL";
        let prefix = [b"some coinbase prefix bytes that are not block aligned" as &[u8], const_ending].concat();
        let link = prefix_to_hash_link(&prefix, const_ending).unwrap();

        let tail_data = b"variable-nonce-bytes";
        let got = check_hash_link(&link, tail_data, const_ending);

        let mut full = prefix.clone();
        full.extend_from_slice(tail_data);
        let expected = crate::hash::hash256(&full);
        assert_eq!(got, expected);
    }

    #[test]
    fn rejects_prefix_without_const_ending() {
        let err = prefix_to_hash_link(b"abc", b"xyz").unwrap_err();
        assert!(matches!(err, ShareChainError::Invariant(_)));
    }

    #[test]
    fn works_across_multiple_block_boundaries() {
        let const_ending = b"END!";
        let mut prefix = vec![0x42u8; 200]; // spans more than 3 blocks
        prefix.extend_from_slice(const_ending);
        let link = prefix_to_hash_link(&prefix, const_ending).unwrap();

        let data = vec![0x7eu8; 130];
        let got = check_hash_link(&link, &data, const_ending);

        let mut full = prefix.clone();
        full.extend_from_slice(&data);
        assert_eq!(got, crate::hash::hash256(&full));
    }

    #[test]
    fn hash_link_pack_roundtrip() {
        let const_ending = b"TAIL";
        let prefix = [b"prefix bytes" as &[u8], const_ending].concat();
        let link = prefix_to_hash_link(&prefix, const_ending).unwrap();

        let mut out = Vec::new();
        link.pack(&mut out);
        let mut buf = out.as_slice();
        let back = HashLink::unpack(&mut buf).unwrap();
        assert_eq!(link, back);
    }
}
