//! V9: the current format. Identical to V8 except for one extra field,
//! `last_txout_nonce`, carried outside `ShareCommon` because it is also
//! baked into the gentx's trailing tagged output (§6) rather than only
//! being part of the share's own metadata.

use crate::error::ShareChainError;
use crate::pack::Packable;

use super::{ShareCommon, WireShare};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareV9 {
    pub common: ShareCommon,
    pub last_txout_nonce: u32,
}

impl ShareV9 {
    pub const VERSION: u32 = 9;

    pub fn unpack(buf: &[u8]) -> Result<Self, ShareChainError> {
        let mut b = buf;
        let common = ShareCommon::unpack(&mut b)?;
        let last_txout_nonce = u32::unpack(&mut b)?;
        if !b.is_empty() {
            return Err(ShareChainError::peer_misbehaving("trailing bytes in V9 share"));
        }
        if common.share_info.share_data.coinbase.len() < 2 {
            return Err(ShareChainError::peer_misbehaving(
                "V9 coinbase length must be at least 2",
            ));
        }
        Ok(ShareV9 { common, last_txout_nonce })
    }

    pub fn as_share(&self) -> WireShare {
        let mut contents = Vec::new();
        self.common.pack(&mut contents);
        self.last_txout_nonce.pack(&mut contents);
        WireShare { type_id: 9, contents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::share::GenerateParams;
    use crate::tracker::Tracker;

    #[test]
    fn round_trips_through_the_wire_envelope() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let gp = GenerateParams::test_default(None, &params, &tracker);
        let builder = crate::share::ShareBuilder::generate(gp).unwrap();
        let share = builder.seal_v9_for_test(42);

        let wire = share.as_share();
        assert_eq!(wire.type_id, 9);
        let back = ShareV9::unpack(&wire.contents).unwrap();
        assert_eq!(back, share);
    }

    #[test]
    fn rejects_a_one_byte_coinbase() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let mut gp = GenerateParams::test_default(None, &params, &tracker);
        gp.coinbase = vec![0u8];
        let builder = crate::share::ShareBuilder::generate(gp).unwrap();
        let share = builder.seal_v9_for_test(1);

        let wire = share.as_share();
        assert!(ShareV9::unpack(&wire.contents).is_err());
    }
}
