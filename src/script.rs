//! Output script construction: pay-to-pubkey-hash for miners, the fixed
//! donation script, and the tagged trailing output that binds a share's ref
//! hash (and, from V9 onward, its last-txout-nonce) into the coinbase.

use crate::hash::Hash256;

/// Standard pay-to-pubkey-hash script for a 160-bit hash.
pub fn pubkey_script_for(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut s = Vec::with_capacity(25);
    s.push(0x76); // OP_DUP
    s.push(0xa9); // OP_HASH160
    s.push(0x14); // push 20 bytes
    s.extend_from_slice(pubkey_hash);
    s.push(0x88); // OP_EQUALVERIFY
    s.push(0xac); // OP_CHECKSIG
    s
}

/// `OP_RETURN <push 32> ref_hash` — 34 bytes, used by share formats V7/V8.
pub fn ref_tail_script_v7_v8(ref_hash: &Hash256) -> Vec<u8> {
    let mut s = Vec::with_capacity(34);
    s.push(0x6a); // OP_RETURN
    s.push(0x20); // push 32 bytes
    s.extend_from_slice(ref_hash.as_bytes());
    s
}

/// `OP_RETURN <push 36> ref_hash last_txout_nonce` — 38 bytes, V9 only.
pub fn ref_tail_script_v9(ref_hash: &Hash256, last_txout_nonce: u32) -> Vec<u8> {
    let mut s = Vec::with_capacity(38);
    s.push(0x6a); // OP_RETURN
    s.push(0x24); // push 36 bytes
    s.extend_from_slice(ref_hash.as_bytes());
    s.extend_from_slice(&last_txout_nonce.to_le_bytes());
    s
}

/// True if `script` is byte-identical to the pool's donation script.
pub fn is_donation_script(script: &[u8], donation_script: &[u8]) -> bool {
    script == donation_script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_script_is_25_bytes() {
        assert_eq!(pubkey_script_for(&[0u8; 20]).len(), 25);
    }

    #[test]
    fn ref_tail_scripts_match_spec_lengths() {
        let h = Hash256::ZERO;
        assert_eq!(ref_tail_script_v7_v8(&h).len(), 34);
        assert_eq!(ref_tail_script_v9(&h, 0).len(), 38);
    }
}
