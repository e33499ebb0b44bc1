//! Bit-exact little-endian binary codecs for the share chain wire format.
//!
//! This is a hand-rolled vocabulary, not a `serde` format: the var-int and
//! sentinel-optional conventions below don't correspond to anything a
//! derive macro produces, so every primitive here is written out. `serde`
//! is still used elsewhere in the crate for debug/test fixtures that never
//! touch the wire.

use crate::error::ShareChainError;

/// Anything that can be packed to and unpacked from the wire format.
pub trait Packable: Sized {
    fn pack(&self, out: &mut Vec<u8>);
    fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError>;
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], ShareChainError> {
    if buf.len() < n {
        return Err(ShareChainError::decode(format!(
            "expected {n} bytes, only {} remain",
            buf.len()
        )));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

macro_rules! impl_packable_uint {
    ($t:ty) => {
        impl Packable for $t {
            fn pack(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn unpack(buf: &mut &[u8]) -> Result<Self, ShareChainError> {
                let bytes = take(buf, std::mem::size_of::<$t>())?;
                Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
            }
        }
    };
}

impl_packable_uint!(u8);
impl_packable_uint!(u16);
impl_packable_uint!(u32);
impl_packable_uint!(u64);

/// Bitcoin-CompactSize-style variable-length integer: 1, 3, 5 or 9 bytes.
pub mod varint {
    use super::*;

    pub fn pack(n: u64, out: &mut Vec<u8>) {
        if n < 0xfd {
            out.push(n as u8);
        } else if n <= 0xffff {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        } else if n <= 0xffff_ffff {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        } else {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }

    pub fn unpack(buf: &mut &[u8]) -> Result<u64, ShareChainError> {
        let tag = u8::unpack(buf)?;
        match tag {
            0xfd => Ok(u16::unpack(buf)? as u64),
            0xfe => Ok(u32::unpack(buf)? as u64),
            0xff => u64::unpack(buf),
            n => Ok(n as u64),
        }
    }

    /// Canonical-form check used by the pack/unpack round-trip property:
    /// reject values encoded wider than necessary.
    pub fn is_canonical(bytes: &[u8]) -> bool {
        let mut b = bytes;
        match unpack(&mut b) {
            Ok(n) => {
                let mut re = Vec::new();
                pack(n, &mut re);
                re == bytes[..bytes.len() - b.len()]
            }
            Err(_) => false,
        }
    }
}

/// Var-int length prefix followed by that many raw bytes.
pub fn pack_bytes(data: &[u8], out: &mut Vec<u8>) {
    varint::pack(data.len() as u64, out);
    out.extend_from_slice(data);
}

pub fn unpack_bytes(buf: &mut &[u8]) -> Result<Vec<u8>, ShareChainError> {
    let len = varint::unpack(buf)? as usize;
    Ok(take(buf, len)?.to_vec())
}

/// A byte string of a fixed, statically-known length: no length prefix.
pub fn pack_fixed_bytes(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(data);
}

pub fn unpack_fixed_bytes<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], ShareChainError> {
    let bytes = take(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// Var-int count prefix followed by that many packed elements.
pub fn pack_list<T: Packable>(items: &[T], out: &mut Vec<u8>) {
    varint::pack(items.len() as u64, out);
    for item in items {
        item.pack(out);
    }
}

pub fn unpack_list<T: Packable>(buf: &mut &[u8]) -> Result<Vec<T>, ShareChainError> {
    let count = varint::unpack(buf)? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(T::unpack(buf)?);
    }
    Ok(out)
}

/// An optional value of a packable type, represented on the wire by a
/// distinguished sentinel in place of `None` rather than a separate tag
/// byte (matching the underlying format this crate's wire envelope mimics).
pub fn pack_optional<T: Packable + PartialEq>(value: Option<&T>, sentinel: &T, out: &mut Vec<u8>) {
    match value {
        Some(v) => v.pack(out),
        None => sentinel.pack(out),
    }
}

pub fn unpack_optional<T: Packable + PartialEq>(
    buf: &mut &[u8],
    sentinel: &T,
) -> Result<Option<T>, ShareChainError> {
    let v = T::unpack(buf)?;
    Ok(if &v == sentinel { None } else { Some(v) })
}

/// An enum backed by a primitive discriminant, packed as that primitive.
pub trait PackableEnum: Sized {
    fn to_primitive(&self) -> u64;
    fn from_primitive(v: u64) -> Result<Self, ShareChainError>;
}

pub fn pack_enum<E: PackableEnum>(e: &E, out: &mut Vec<u8>) {
    varint::pack(e.to_primitive(), out);
}

pub fn unpack_enum<E: PackableEnum>(buf: &mut &[u8]) -> Result<E, ShareChainError> {
    E::from_primitive(varint::unpack(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrips_across_all_widths() {
        for n in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut out = Vec::new();
            varint::pack(n, &mut out);
            let mut buf = out.as_slice();
            assert_eq!(varint::unpack(&mut buf).unwrap(), n);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn varint_uses_minimal_width() {
        let mut out = Vec::new();
        varint::pack(1, &mut out);
        assert_eq!(out, vec![1]);

        let mut out = Vec::new();
        varint::pack(0xfd, &mut out);
        assert_eq!(out[0], 0xfd);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn length_prefixed_bytes_roundtrip() {
        let data = vec![1u8, 2, 3, 4, 5];
        let mut out = Vec::new();
        pack_bytes(&data, &mut out);
        let mut buf = out.as_slice();
        assert_eq!(unpack_bytes(&mut buf).unwrap(), data);
    }

    #[test]
    fn fixed_bytes_roundtrip() {
        let data = [9u8; 32];
        let mut out = Vec::new();
        pack_fixed_bytes(&data, &mut out);
        let mut buf = out.as_slice();
        assert_eq!(unpack_fixed_bytes::<32>(&mut buf).unwrap(), data);
    }

    #[test]
    fn list_roundtrips() {
        let items: Vec<u32> = vec![1, 2, 3, 400000];
        let mut out = Vec::new();
        pack_list(&items, &mut out);
        let mut buf = out.as_slice();
        let back: Vec<u32> = unpack_list(&mut buf).unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn optional_uses_sentinel() {
        let sentinel = 0u32;
        let mut out = Vec::new();
        pack_optional(None, &sentinel, &mut out);
        let mut buf = out.as_slice();
        assert_eq!(unpack_optional(&mut buf, &sentinel).unwrap(), None);

        let mut out = Vec::new();
        pack_optional(Some(&7u32), &sentinel, &mut out);
        let mut buf = out.as_slice();
        assert_eq!(unpack_optional(&mut buf, &sentinel).unwrap(), Some(7));
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        let mut buf: &[u8] = &[0x01];
        let err = u32::unpack(&mut buf).unwrap_err();
        assert!(matches!(err, ShareChainError::Decode(_)));
    }
}
