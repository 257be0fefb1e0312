//! Fixed-width record contract.

use std::fmt::Debug;

use byteorder::{ByteOrder, NativeEndian};

/// A record is a comparable chunk of memory of constant size.
///
/// Records are trivially copyable, totally ordered by `<` and encoded in
/// host byte order, matching the raw input and run file formats. The sort
/// is ascending.
pub trait Record: Copy + Ord + Debug + Send + 'static {
    /// Encoded size of the record in bytes.
    const WIDTH: usize;

    /// Decodes a record from the first `WIDTH` bytes of `data`.
    ///
    /// The implementation must not read more than `WIDTH` bytes from `data`.
    fn from_bytes(data: &[u8]) -> Self;

    /// Encodes this record into the first `WIDTH` bytes of `data`.
    ///
    /// The implementation must not write more than `WIDTH` bytes to `data`.
    fn to_bytes(&self, data: &mut [u8]);

    /// The greatest representable record.
    ///
    /// Used as the sentinel padding an under-filled workspace; it must
    /// compare greater than or equal to every real record.
    fn max_record() -> Self;
}

impl Record for i32 {
    const WIDTH: usize = 4;

    fn from_bytes(data: &[u8]) -> Self {
        NativeEndian::read_i32(data)
    }

    fn to_bytes(&self, data: &mut [u8]) {
        NativeEndian::write_i32(data, *self)
    }

    fn max_record() -> Self {
        i32::MAX
    }
}

impl Record for u32 {
    const WIDTH: usize = 4;

    fn from_bytes(data: &[u8]) -> Self {
        NativeEndian::read_u32(data)
    }

    fn to_bytes(&self, data: &mut [u8]) {
        NativeEndian::write_u32(data, *self)
    }

    fn max_record() -> Self {
        u32::MAX
    }
}

impl Record for i64 {
    const WIDTH: usize = 8;

    fn from_bytes(data: &[u8]) -> Self {
        NativeEndian::read_i64(data)
    }

    fn to_bytes(&self, data: &mut [u8]) {
        NativeEndian::write_i64(data, *self)
    }

    fn max_record() -> Self {
        i64::MAX
    }
}

impl Record for u64 {
    const WIDTH: usize = 8;

    fn from_bytes(data: &[u8]) -> Self {
        NativeEndian::read_u64(data)
    }

    fn to_bytes(&self, data: &mut [u8]) {
        NativeEndian::write_u64(data, *self)
    }

    fn max_record() -> Self {
        u64::MAX
    }
}

#[cfg(test)]
mod test {
    use super::Record;
    use rstest::*;

    #[rstest]
    #[case(0)]
    #[case(-1)]
    #[case(i32::MIN)]
    #[case(i32::MAX)]
    fn test_i32_codec(#[case] value: i32) {
        let mut raw = [0u8; 4];
        value.to_bytes(&mut raw);
        assert_eq!(i32::from_bytes(&raw), value);
    }

    #[test]
    fn test_max_record_dominates() {
        assert!(i32::max_record() >= 0);
        assert!(u64::max_record() >= u64::from_bytes(&[0xff; 8]));
    }
}
