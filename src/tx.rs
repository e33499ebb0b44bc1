//! The generation transaction ("gentx"): the coinbase-style transaction
//! every share's `hash_link` commits to. Other transactions a share
//! includes are referenced only by hash and byte length (§4.3 step 6); this
//! crate never carries their full bytes, since the mempool is external.

use crate::hash::{hash256, Hash256};
use crate::pack::{pack_bytes, varint, Packable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

impl Packable for TxOut {
    fn pack(&self, out: &mut Vec<u8>) {
        self.value.pack(out);
        pack_bytes(&self.script, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, crate::error::ShareChainError> {
        let value = u64::unpack(buf)?;
        let script = crate::pack::unpack_bytes(buf)?;
        Ok(TxOut { value, script })
    }
}

/// A single-input, many-output coinbase-style transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gentx {
    pub coinbase: Vec<u8>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

/// Input sequence number, the last four bytes of [`Gentx::input_prefix`] and
/// the `const_ending` every gentx's [`crate::hashlink::HashLink`] is anchored
/// on: every coinbase has this tail regardless of its (share-specific)
/// output list, so it is the one constant boundary `prefix_to_hash_link` can
/// always find.
pub const SEQUENCE: u32 = 0xFFFF_FFFF;

impl Gentx {
    /// Serializes the whole transaction, in the legacy (non-segwit) layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.input_prefix();
        out.extend_from_slice(&self.outputs_and_locktime());
        out
    }

    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Version through the coinbase input's sequence number: the part of
    /// the gentx that never depends on chain-state weights, so a
    /// [`crate::hashlink::HashLink`] can commit to it once and let
    /// validation recompute the output section independently rather than
    /// carrying it over the wire.
    pub fn input_prefix(&self) -> Vec<u8> {
        let mut out = Vec::new();
        1u32.pack(&mut out); // version
        varint::pack(1, &mut out); // one input
        out.extend_from_slice(&[0u8; 32]); // null prevout hash
        out.extend_from_slice(&SEQUENCE.to_le_bytes()); // prevout index
        pack_bytes(&self.coinbase, &mut out);
        out.extend_from_slice(&SEQUENCE.to_le_bytes()); // sequence
        out
    }

    /// Output count, every output, and the lock time: the part of the
    /// gentx that a [`crate::hashlink::HashLink`]'s "data" argument supplies
    /// at check time, reconstructed from chain state rather than read off
    /// the wire.
    pub fn outputs_and_locktime(&self) -> Vec<u8> {
        let mut out = Vec::new();
        varint::pack(self.outputs.len() as u64, &mut out);
        for txout in &self.outputs {
            txout.pack(&mut out);
        }
        self.lock_time.pack(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_is_deterministic() {
        let gentx = Gentx {
            coinbase: vec![1, 2, 3],
            outputs: vec![TxOut {
                value: 100,
                script: vec![0x51],
            }],
            lock_time: 0,
        };
        assert_eq!(gentx.serialize(), gentx.serialize());
        assert_eq!(gentx.hash(), gentx.hash());
    }

    #[test]
    fn prefix_and_tail_concatenate_to_the_full_serialization() {
        let gentx = Gentx {
            coinbase: vec![9, 9],
            outputs: vec![
                TxOut { value: 10, script: vec![0x51] },
                TxOut { value: 20, script: vec![0x52] },
            ],
            lock_time: 7,
        };
        let mut combined = gentx.input_prefix();
        combined.extend_from_slice(&gentx.outputs_and_locktime());
        assert_eq!(combined, gentx.serialize());
    }

    #[test]
    fn tx_out_pack_roundtrip() {
        let out = TxOut {
            value: 4242,
            script: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let mut buf = Vec::new();
        out.pack(&mut buf);
        let mut s = buf.as_slice();
        assert_eq!(TxOut::unpack(&mut s).unwrap(), out);
    }
}
