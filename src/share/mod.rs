//! Share variants V7, V8 and V9: three concrete wire formats over one
//! common capability set, modeled as a tagged union rather than a class
//! hierarchy — the variant set is closed and known at compile time, so a
//! `match` replaces virtual dispatch.

mod check;
mod generate;
mod v7;
mod v8;
mod v9;

pub use generate::{ShareBuilder, GenerateParams};
pub use v7::ShareV7;
pub use v8::ShareV8;
pub use v9::ShareV9;

use crate::bits::Bits;
use crate::error::ShareChainError;
use crate::hash::Hash256;
use crate::hashlink::HashLink;
use crate::merkle::MerkleLink;
use crate::pack::{self, Packable};

/// Flags a miner attaches to a share describing why it's known not to have
/// become a live chain tip, when that's already known at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleInfo {
    None,
    Orphan,
    Doa,
    /// Any other code not reserved by `Orphan`/`Doa` (253/254) or `None` (0).
    Unknown(u8),
}

impl StaleInfo {
    fn to_code(self) -> u8 {
        match self {
            StaleInfo::None => 0,
            StaleInfo::Orphan => 253,
            StaleInfo::Doa => 254,
            StaleInfo::Unknown(k) => k,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => StaleInfo::None,
            253 => StaleInfo::Orphan,
            254 => StaleInfo::Doa,
            k => StaleInfo::Unknown(k),
        }
    }
}

impl Packable for StaleInfo {
    fn pack(&self, out: &mut Vec<u8>) {
        self.to_code().pack(out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        Ok(StaleInfo::from_code(u8::unpack(buf)?))
    }
}

/// `(share_count, tx_count)`: "this transaction's hash was announced
/// `share_count` shares back, at position `tx_count` in that share's
/// `new_transaction_hashes`." V8/V9 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHashRef {
    pub share_count: u64,
    pub tx_count: u64,
}

/// Hard wire-level bound on how far back a `TxHashRef` may point.
pub const MAX_TX_HASH_REF_SHARE_COUNT: u64 = 110;

impl Packable for TxHashRef {
    fn pack(&self, out: &mut Vec<u8>) {
        pack::varint::pack(self.share_count, out);
        pack::varint::pack(self.tx_count, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        let share_count = pack::varint::unpack(buf)?;
        let tx_count = pack::varint::unpack(buf)?;
        if share_count >= MAX_TX_HASH_REF_SHARE_COUNT {
            return Err(ShareChainError::peer_misbehaving(format!(
                "transaction_hash_refs.share_count {share_count} >= {MAX_TX_HASH_REF_SHARE_COUNT}"
            )));
        }
        Ok(TxHashRef { share_count, tx_count })
    }
}

/// Fields common to every version, carried inside the coinbase-committing
/// `share_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareData {
    pub previous_share_hash: Option<Hash256>,
    pub coinbase: Vec<u8>,
    pub nonce: u32,
    pub pubkey_hash: [u8; 20],
    pub subsidy: u64,
    pub donation: u16,
    pub stale_info: StaleInfo,
    pub desired_version: u64,
}

impl Packable for ShareData {
    fn pack(&self, out: &mut Vec<u8>) {
        pack::pack_optional(self.previous_share_hash.as_ref(), &Hash256::ZERO, out);
        pack::pack_bytes(&self.coinbase, out);
        self.nonce.pack(out);
        pack::pack_fixed_bytes(&self.pubkey_hash, out);
        self.subsidy.pack(out);
        self.donation.pack(out);
        self.stale_info.pack(out);
        pack::varint::pack(self.desired_version, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        let previous_share_hash = pack::unpack_optional(buf, &Hash256::ZERO)?;
        let coinbase = pack::unpack_bytes(buf)?;
        // Baseline bound shared by every version (V7's own rule is `[1, 100]`);
        // V8/V9 additionally require `len >= 2` and enforce that themselves
        // once they know which version they are.
        if coinbase.is_empty() || coinbase.len() > 100 {
            return Err(ShareChainError::peer_misbehaving(format!(
                "coinbase length {} out of [1, 100]",
                coinbase.len()
            )));
        }
        let nonce = u32::unpack(buf)?;
        let pubkey_hash = pack::unpack_fixed_bytes::<20>(buf)?;
        let subsidy = u64::unpack(buf)?;
        let donation = u16::unpack(buf)?;
        let stale_info = StaleInfo::unpack(buf)?;
        let desired_version = pack::varint::unpack(buf)?;
        Ok(ShareData {
            previous_share_hash,
            coinbase,
            nonce,
            pubkey_hash,
            subsidy,
            donation,
            stale_info,
            desired_version,
        })
    }
}

/// The coinbase-committing payload every version assembles and checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub share_data: ShareData,
    pub far_share_hash: Option<Hash256>,
    pub max_bits: Bits,
    pub bits: Bits,
    pub timestamp: u32,
    /// New transaction hashes this share is the first to announce.
    /// Empty for V7, which carries full transaction bodies instead.
    pub new_transaction_hashes: Vec<Hash256>,
    /// Back-references to transactions announced by earlier shares.
    pub transaction_hash_refs: Vec<TxHashRef>,
}

impl Packable for ShareInfo {
    fn pack(&self, out: &mut Vec<u8>) {
        self.share_data.pack(out);
        pack::pack_optional(self.far_share_hash.as_ref(), &Hash256::ZERO, out);
        self.max_bits.pack(out);
        self.bits.pack(out);
        self.timestamp.pack(out);
        pack::pack_list(&self.new_transaction_hashes, out);
        pack::pack_list(&self.transaction_hash_refs, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        let share_data = ShareData::unpack(buf)?;
        let far_share_hash = pack::unpack_optional(buf, &Hash256::ZERO)?;
        let max_bits = Bits::unpack(buf)?;
        let bits = Bits::unpack(buf)?;
        let timestamp = u32::unpack(buf)?;
        let new_transaction_hashes = pack::unpack_list(buf)?;
        let transaction_hash_refs = pack::unpack_list(buf)?;
        Ok(ShareInfo {
            share_data,
            far_share_hash,
            max_bits,
            bits,
            timestamp,
            new_transaction_hashes,
            transaction_hash_refs,
        })
    }
}

/// The block header a share embeds, minus its merkle root (recomputed from
/// the share's own [`MerkleLink`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinHeader {
    pub version: u32,
    pub previous_block: Hash256,
    pub timestamp: u32,
    pub bits: Bits,
    pub nonce: u32,
}

impl MinHeader {
    /// Assembles the full header and hashes it: this is the share hash.
    pub fn hash_with_merkle_root(&self, merkle_root: Hash256) -> Hash256 {
        let mut buf = Vec::with_capacity(80);
        self.version.pack(&mut buf);
        buf.extend_from_slice(self.previous_block.as_bytes());
        buf.extend_from_slice(merkle_root.as_bytes());
        self.timestamp.pack(&mut buf);
        self.bits.0.pack(&mut buf);
        self.nonce.pack(&mut buf);
        crate::hash::hash256(&buf)
    }
}

impl Packable for MinHeader {
    fn pack(&self, out: &mut Vec<u8>) {
        self.version.pack(out);
        self.previous_block.pack(out);
        self.timestamp.pack(out);
        self.bits.pack(out);
        self.nonce.pack(out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        Ok(MinHeader {
            version: u32::unpack(buf)?,
            previous_block: Hash256::unpack(buf)?,
            timestamp: u32::unpack(buf)?,
            bits: Bits::unpack(buf)?,
            nonce: u32::unpack(buf)?,
        })
    }
}

/// Fields held in common by all three variants (everything but the
/// version-specific transaction-bundle representation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareCommon {
    pub share_info: ShareInfo,
    pub min_header: MinHeader,
    pub merkle_link: MerkleLink,
    pub ref_merkle_link: MerkleLink,
    pub hash_link: HashLink,
    pub gentx_hash: Hash256,
}

impl ShareCommon {
    pub fn hash(&self) -> Hash256 {
        let merkle_root = crate::merkle::check_merkle_link(&self.merkle_link, self.gentx_hash);
        self.min_header.hash_with_merkle_root(merkle_root)
    }

    pub fn target(&self) -> num_bigint::BigUint {
        self.share_info.bits.target()
    }

    pub fn max_target(&self) -> num_bigint::BigUint {
        self.share_info.max_bits.target()
    }

    pub fn previous_hash(&self) -> Option<Hash256> {
        self.share_info.share_data.previous_share_hash
    }

    pub fn timestamp(&self) -> u32 {
        self.share_info.timestamp
    }

    pub fn subsidy(&self) -> u64 {
        self.share_info.share_data.subsidy
    }

    pub fn donation(&self) -> u16 {
        self.share_info.share_data.donation
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        self.share_info.share_data.pubkey_hash
    }
}

/// The tagged union of all three share formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyShare {
    V7(ShareV7),
    V8(ShareV8),
    V9(ShareV9),
}

/// Static successor table: which version a version upgrades to, if any.
pub fn successor(version: u32) -> Option<u32> {
    match version {
        7 => Some(9),
        8 => Some(9),
        9 => None,
        _ => None,
    }
}

impl AnyShare {
    pub fn version(&self) -> u32 {
        match self {
            AnyShare::V7(_) => 7,
            AnyShare::V8(_) => 8,
            AnyShare::V9(_) => 9,
        }
    }

    pub fn common(&self) -> &ShareCommon {
        match self {
            AnyShare::V7(s) => &s.common,
            AnyShare::V8(s) => &s.common,
            AnyShare::V9(s) => &s.common,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.common().hash()
    }

    pub fn previous_hash(&self) -> Option<Hash256> {
        self.common().previous_hash()
    }

    pub fn target(&self) -> num_bigint::BigUint {
        self.common().target()
    }

    pub fn max_target(&self) -> num_bigint::BigUint {
        self.common().max_target()
    }

    pub fn timestamp(&self) -> u32 {
        self.common().timestamp()
    }

    pub fn desired_version(&self) -> u64 {
        self.common().share_info.share_data.desired_version
    }

    pub fn successor_version(&self) -> Option<u32> {
        successor(self.version())
    }

    pub fn subsidy(&self) -> u64 {
        self.common().subsidy()
    }

    pub fn donation(&self) -> u16 {
        self.common().donation()
    }

    /// The pay-to-pubkey-hash script the weights skiplist and
    /// `generate_transaction` key this share's payout on.
    pub fn pubkey_script(&self) -> Vec<u8> {
        crate::script::pubkey_script_for(&self.common().pubkey_hash())
    }

    /// New transaction hashes this share is the first to announce. Always
    /// empty for V7, which inlines full transaction bodies instead.
    pub fn new_transaction_hashes(&self) -> &[Hash256] {
        &self.common().share_info.new_transaction_hashes
    }

    pub fn transaction_hash_refs(&self) -> &[TxHashRef] {
        &self.common().share_info.transaction_hash_refs
    }

    /// Reconstructs the full ordered list of other-transaction hashes this
    /// share's gentx committed to, by resolving each [`TxHashRef`] against
    /// ancestor shares and interleaving with `new_transaction_hashes`.
    pub fn get_other_tx_hashes(&self, tracker: &crate::tracker::Tracker) -> Result<Vec<Hash256>, ShareChainError> {
        let mut out = Vec::with_capacity(self.common().share_info.transaction_hash_refs.len());
        // `share_count == 0` means this transaction wasn't found among the
        // last 100 ancestors when the share was built, so it was announced
        // fresh in this very share's own `new_transaction_hashes[tx_count]`.
        for tx_ref in &self.common().share_info.transaction_hash_refs {
            if tx_ref.share_count == 0 {
                let hash = self
                    .new_transaction_hashes()
                    .get(tx_ref.tx_count as usize)
                    .ok_or_else(|| {
                        ShareChainError::invariant("transaction_hash_refs references a missing new-hash slot")
                    })?;
                out.push(*hash);
                continue;
            }
            let ancestor_hash = tracker
                .get_nth_parent_hash(&self.hash(), tx_ref.share_count)
                .ok_or_else(|| ShareChainError::invariant("transaction_hash_refs points past a known ancestor"))?;
            let ancestor = tracker
                .get(&ancestor_hash)
                .ok_or_else(|| ShareChainError::invariant("transaction_hash_refs ancestor missing from tracker"))?;
            let hash = ancestor
                .new_transaction_hashes()
                .get(tx_ref.tx_count as usize)
                .ok_or_else(|| ShareChainError::invariant("transaction_hash_refs tx_count out of range"))?;
            out.push(*hash);
        }
        Ok(out)
    }

    /// Validates construction-time invariants common to every version:
    /// PoW under target, target bounds, coinbase length, merkle depth.
    /// Version-specific constructors call this before returning `Ok`.
    fn validate_common(&self, params: &crate::params::Params) -> Result<(), ShareChainError> {
        let hash = self.hash();
        let target = self.target();
        if hash.to_biguint_le() > target {
            return Err(ShareChainError::peer_misbehaving("PoW hash exceeds target"));
        }
        if target > params.max_target {
            return Err(ShareChainError::peer_misbehaving("target exceeds MAX_TARGET"));
        }
        let max_target = self.max_target();
        if max_target < params.min_target || max_target > params.max_target {
            return Err(ShareChainError::peer_misbehaving("max_target out of bounds"));
        }
        if target > max_target.clone() || target.clone() * 10u32 < max_target {
            return Err(ShareChainError::peer_misbehaving(
                "bits not within [max_bits/10, max_bits]",
            ));
        }
        if self.common().merkle_link.depth() > crate::merkle::MAX_MERKLE_DEPTH {
            return Err(ShareChainError::peer_misbehaving("merkle link too deep"));
        }
        Ok(())
    }

    pub fn check(&self, tracker: &crate::tracker::Tracker, params: &crate::params::Params) -> Result<crate::tx::Gentx, ShareChainError> {
        check::check(self, tracker, params)
    }

    pub fn should_punish_reason(
        &self,
        previous_block: Hash256,
        bits: Bits,
        tracker: &crate::tracker::Tracker,
        known_txs: &std::collections::HashMap<Hash256, usize>,
        is_local: bool,
    ) -> (i32, Option<String>) {
        check::should_punish_reason(self, previous_block, bits, tracker, known_txs, is_local)
    }
}

/// The wire envelope: `{type: var-int, contents: length-prefixed bytes}`.
pub struct WireShare {
    pub type_id: u64,
    pub contents: Vec<u8>,
}

impl Packable for WireShare {
    fn pack(&self, out: &mut Vec<u8>) {
        pack::varint::pack(self.type_id, out);
        pack::pack_bytes(&self.contents, out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        let type_id = pack::varint::unpack(buf)?;
        let contents = pack::unpack_bytes(buf)?;
        Ok(WireShare { type_id, contents })
    }
}

/// Decodes a raw wire envelope into a concrete share, validating its
/// construction-time invariants.
pub fn load_share(
    raw: &[u8],
    params: &crate::params::Params,
) -> Result<AnyShare, ShareChainError> {
    let mut buf = raw;
    let envelope = WireShare::unpack(&mut buf)?;
    if !buf.is_empty() {
        return Err(ShareChainError::peer_misbehaving(
            "trailing bytes after share envelope",
        ));
    }

    let share = match envelope.type_id {
        0..=3 => {
            return Err(ShareChainError::peer_misbehaving(format!(
                "obsolete share type {}",
                envelope.type_id
            )))
        }
        4 => AnyShare::V7(v7::ShareV7::unpack_stub(&envelope.contents)?),
        5 => AnyShare::V7(v7::ShareV7::unpack_full(&envelope.contents)?),
        8 => AnyShare::V8(v8::ShareV8::unpack(&envelope.contents)?),
        9 => AnyShare::V9(v9::ShareV9::unpack(&envelope.contents)?),
        other => {
            return Err(ShareChainError::peer_misbehaving(format!(
                "unknown share type {other}"
            )))
        }
    };

    share.validate_common(params)?;
    Ok(share)
}

/// Encodes a share back to its wire envelope.
pub fn as_share(share: &AnyShare) -> WireShare {
    match share {
        AnyShare::V7(s) => s.as_share(),
        AnyShare::V8(s) => {
            let mut contents = Vec::new();
            s.common.pack(&mut contents);
            WireShare { type_id: 8, contents }
        }
        AnyShare::V9(s) => {
            let mut contents = Vec::new();
            s.common.pack(&mut contents);
            s.last_txout_nonce.pack(&mut contents);
            WireShare { type_id: 9, contents }
        }
    }
}

impl Packable for ShareCommon {
    fn pack(&self, out: &mut Vec<u8>) {
        self.share_info.pack(out);
        self.min_header.pack(out);
        self.merkle_link.pack(out);
        self.ref_merkle_link.pack(out);
        self.hash_link.pack(out);
        self.gentx_hash.pack(out);
    }

    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
        Ok(ShareCommon {
            share_info: ShareInfo::unpack(buf)?,
            min_header: MinHeader::unpack(buf)?,
            merkle_link: MerkleLink::unpack(buf)?,
            ref_merkle_link: MerkleLink::unpack(buf)?,
            hash_link: HashLink::unpack(buf)?,
            gentx_hash: Hash256::unpack(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_table_matches_spec() {
        assert_eq!(successor(7), Some(9));
        assert_eq!(successor(8), Some(9));
        assert_eq!(successor(9), None);
    }

    #[test]
    fn stale_info_roundtrips() {
        for v in [StaleInfo::None, StaleInfo::Orphan, StaleInfo::Doa, StaleInfo::Unknown(17)] {
            let mut out = Vec::new();
            v.pack(&mut out);
            let mut buf = out.as_slice();
            assert_eq!(StaleInfo::unpack(&mut buf).unwrap(), v);
        }
    }

    #[test]
    fn tx_hash_ref_rejects_out_of_bound_share_count() {
        let mut out = Vec::new();
        pack::varint::pack(200, &mut out);
        pack::varint::pack(0, &mut out);
        let mut buf = out.as_slice();
        assert!(TxHashRef::unpack(&mut buf).is_err());
    }
}
