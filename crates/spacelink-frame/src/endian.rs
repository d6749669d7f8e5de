//! Endian-aware reads and writes of fixed-width numbers.
//!
//! Wire formats in this crate are little-endian unless stated otherwise;
//! the helpers take an explicit [`ByteOrder`] so big-endian device links can
//! share them.

use bytes::{BufMut, BytesMut};

use crate::error::{ensure_len, Result};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Network byte order.
    pub const NETWORK: ByteOrder = ByteOrder::Big;

    /// True if values in this order can be copied without swapping.
    pub fn is_local(self) -> bool {
        self == local_byte_order()
    }
}

/// Byte order of the machine running this code.
pub fn local_byte_order() -> ByteOrder {
    if cfg!(target_endian = "little") {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    }
}

macro_rules! number_codec {
    ($read:ident, $put:ident, $ty:ty, $width:expr) => {
        #[doc = concat!("Read a `", stringify!($ty), "` from the front of `buf`.")]
        pub fn $read(buf: &[u8], order: ByteOrder) -> Result<$ty> {
            ensure_len(buf, $width)?;
            let mut raw = [0u8; $width];
            raw.copy_from_slice(&buf[..$width]);
            Ok(match order {
                ByteOrder::Little => <$ty>::from_le_bytes(raw),
                ByteOrder::Big => <$ty>::from_be_bytes(raw),
            })
        }

        #[doc = concat!("Append a `", stringify!($ty), "` to `dst`.")]
        pub fn $put(dst: &mut BytesMut, value: $ty, order: ByteOrder) {
            match order {
                ByteOrder::Little => dst.put_slice(&value.to_le_bytes()),
                ByteOrder::Big => dst.put_slice(&value.to_be_bytes()),
            }
        }
    };
}

number_codec!(read_u16, put_u16, u16, 2);
number_codec!(read_i16, put_i16, i16, 2);
number_codec!(read_u32, put_u32, u32, 4);
number_codec!(read_i32, put_i32, i32, 4);
number_codec!(read_u64, put_u64, u64, 8);
number_codec!(read_f32, put_f32, f32, 4);
number_codec!(read_f64, put_f64, f64, 8);

/// Bitwise complement of every byte.
pub fn invert_bytes(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| !b).collect()
}

/// Bounds-checked sequential reader over a byte slice.
///
/// Every accessor fails with `FrameError::Truncated` instead of panicking
/// when the slice runs out.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ByteReader<'a> {
    /// Little-endian reader.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_order(buf, ByteOrder::Little)
    }

    pub fn with_order(buf: &'a [u8], order: ByteOrder) -> Self {
        Self { buf, pos: 0, order }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        ensure_len(rest, len)?;
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Take everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        read_u16(self.bytes(2)?, self.order)
    }

    pub fn i16(&mut self) -> Result<i16> {
        read_i16(self.bytes(2)?, self.order)
    }

    pub fn u32(&mut self) -> Result<u32> {
        read_u32(self.bytes(4)?, self.order)
    }

    pub fn i32(&mut self) -> Result<i32> {
        read_i32(self.bytes(4)?, self.order)
    }

    pub fn u64(&mut self) -> Result<u64> {
        read_u64(self.bytes(8)?, self.order)
    }

    pub fn f32(&mut self) -> Result<f32> {
        read_f32(self.bytes(4)?, self.order)
    }

    pub fn f64(&mut self) -> Result<f64> {
        read_f64(self.bytes(8)?, self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    #[test]
    fn little_and_big_disagree_on_layout() {
        let mut le = BytesMut::new();
        let mut be = BytesMut::new();
        put_u32(&mut le, 0x1ACF_FC1D, ByteOrder::Little);
        put_u32(&mut be, 0x1ACF_FC1D, ByteOrder::Big);
        assert_eq!(le.as_ref(), &[0x1D, 0xFC, 0xCF, 0x1A]);
        assert_eq!(be.as_ref(), &[0x1A, 0xCF, 0xFC, 0x1D]);
        assert_eq!(read_u32(&be, ByteOrder::Big).unwrap(), 0x1ACF_FC1D);
    }

    #[test]
    fn floats_survive_either_order() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut buf = BytesMut::new();
            put_f64(&mut buf, -1234.5678, order);
            put_f32(&mut buf, 0.25, order);
            assert_eq!(read_f64(&buf, order).unwrap(), -1234.5678);
            assert_eq!(read_f32(&buf[8..], order).unwrap(), 0.25);
        }
    }

    #[test]
    fn signed_values_keep_sign() {
        let mut buf = BytesMut::new();
        put_i16(&mut buf, -2, ByteOrder::Little);
        put_i32(&mut buf, -70_000, ByteOrder::Little);
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.i16().unwrap(), -2);
        assert_eq!(reader.i32().unwrap(), -70_000);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_input_is_an_error() {
        let err = read_u32(&[1, 2, 3], ByteOrder::Little).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                needed: 4,
                available: 3
            }
        ));

        let mut reader = ByteReader::new(&[9]);
        assert_eq!(reader.u8().unwrap(), 9);
        assert!(reader.u16().is_err());
    }

    #[test]
    fn local_order_matches_target() {
        let order = local_byte_order();
        assert!(order.is_local());
        assert_eq!(
            u16::from_ne_bytes([1, 0]) == 1,
            order == ByteOrder::Little
        );
    }

    #[test]
    fn invert_is_an_involution() {
        let data = [0x00, 0xFF, 0x5A];
        assert_eq!(invert_bytes(&data), vec![0xFF, 0x00, 0xA5]);
        assert_eq!(invert_bytes(&invert_bytes(&data)), data.to_vec());
    }
}
