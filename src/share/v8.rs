//! V8: the first hash-reference format. Carries only
//! `new_transaction_hashes`/`transaction_hash_refs` in its common
//! `share_info` rather than full transaction bodies.

use crate::error::ShareChainError;
use crate::pack::Packable;

use super::{ShareCommon, WireShare};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareV8 {
    pub common: ShareCommon,
}

impl ShareV8 {
    pub const VERSION: u32 = 8;

    pub fn unpack(buf: &[u8]) -> Result<Self, ShareChainError> {
        let mut b = buf;
        let common = ShareCommon::unpack(&mut b)?;
        if !b.is_empty() {
            return Err(ShareChainError::peer_misbehaving("trailing bytes in V8 share"));
        }
        if common.share_info.share_data.coinbase.len() < 2 {
            return Err(ShareChainError::peer_misbehaving(
                "V8 coinbase length must be at least 2",
            ));
        }
        Ok(ShareV8 { common })
    }

    pub fn as_share(&self) -> WireShare {
        let mut contents = Vec::new();
        self.common.pack(&mut contents);
        WireShare { type_id: 8, contents }
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
        let share = builder.seal_v8_for_test();

        let wire = share.as_share();
        assert_eq!(wire.type_id, 8);
        let back = ShareV8::unpack(&wire.contents).unwrap();
        assert_eq!(back, share);
    }

    #[test]
    fn rejects_a_one_byte_coinbase() {
        let params = Params::test_params();
        let tracker = Tracker::new();
        let mut gp = GenerateParams::test_default(None, &params, &tracker);
        gp.coinbase = vec![0u8];
        let builder = crate::share::ShareBuilder::generate(gp).unwrap();
        let share = builder.seal_v8_for_test();

        let wire = share.as_share();
        assert!(ShareV8::unpack(&wire.contents).is_err());
    }
}
