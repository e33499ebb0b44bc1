//! V7: the legacy format that carries its non-coinbase transactions inline
//! rather than by reference. Wire type `5` ("share1b") carries the full
//! bundle; type `4` ("share1a") is the same share without it — used once
//! the bundle has already propagated by other means, with the merkle root
//! still recomputed from whatever's locally known.

use crate::error::ShareChainError;
use crate::pack::{self, Packable};

use super::{ShareCommon, WireShare};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareV7 {
    pub common: ShareCommon,
    /// `None` for the share1a stub; `Some` (possibly empty) for share1b.
    pub other_transactions: Option<Vec<Vec<u8>>>,
}

impl ShareV7 {
    pub const VERSION: u32 = 7;

    pub fn unpack_stub(buf: &[u8]) -> Result<Self, ShareChainError> {
        let mut b = buf;
        let common = ShareCommon::unpack(&mut b)?;
        if !b.is_empty() {
            return Err(ShareChainError::peer_misbehaving("trailing bytes in share1a"));
        }
        Ok(ShareV7 { common, other_transactions: None })
    }

    pub fn unpack_full(buf: &[u8]) -> Result<Self, ShareChainError> {
        let mut b = buf;
        let common = ShareCommon::unpack(&mut b)?;
        let count = pack::varint::unpack(&mut b)? as usize;
        let mut txs = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            txs.push(pack::unpack_bytes(&mut b)?);
        }
        if !b.is_empty() {
            return Err(ShareChainError::peer_misbehaving("trailing bytes in share1b"));
        }
        Ok(ShareV7 { common, other_transactions: Some(txs) })
    }

    pub fn as_share(&self) -> WireShare {
        let mut contents = Vec::new();
        self.common.pack(&mut contents);
        match &self.other_transactions {
            None => WireShare { type_id: 4, contents },
            Some(txs) => {
                pack::varint::pack(txs.len() as u64, &mut contents);
                for tx in txs {
                    pack::pack_bytes(tx, &mut contents);
                }
                WireShare { type_id: 5, contents }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::GenerateParams;
    use crate::params::Params;
    use crate::tracker::Tracker;

    #[test]
    fn stub_and_full_round_trip_through_the_wire_envelope() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, &params, &tracker);
        let builder = crate::share::ShareBuilder::generate(gp).unwrap();

        let stub = builder.clone().seal_v7_for_test(None);
        let wire = stub.as_share();
        assert_eq!(wire.type_id, 4);
        let back = ShareV7::unpack_stub(&wire.contents).unwrap();
        assert_eq!(back, stub);

        let full = builder.seal_v7_for_test(Some(vec![vec![1, 2, 3]]));
        let wire = full.as_share();
        assert_eq!(wire.type_id, 5);
        let back = ShareV7::unpack_full(&wire.contents).unwrap();
        assert_eq!(back, full);
    }
}
