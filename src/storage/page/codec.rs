use byteorder::{ByteOrder, LittleEndian};

/// Fixed-width key encoding for index pages.
///
/// Slot offsets inside a bucket page are computed from `ENCODED_LEN`, so an
/// implementation must write exactly that many bytes.
pub trait KeyCodec: Copy + PartialEq + Default {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// Fixed-width value encoding for index pages
pub trait ValueCodec: Copy + PartialEq + Default {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_codecs {
    ($ty:ty, $len:expr, $read:path, $write:path) => {
        impl KeyCodec for $ty {
            const ENCODED_LEN: usize = $len;

            fn encode(&self, buf: &mut [u8]) {
                $write(buf, *self);
            }

            fn decode(buf: &[u8]) -> Self {
                $read(buf)
            }
        }

        impl ValueCodec for $ty {
            const ENCODED_LEN: usize = $len;

            fn encode(&self, buf: &mut [u8]) {
                $write(buf, *self);
            }

            fn decode(buf: &[u8]) -> Self {
                $read(buf)
            }
        }
    };
}

impl_codecs!(u32, 4, LittleEndian::read_u32, LittleEndian::write_u32);
impl_codecs!(u64, 8, LittleEndian::read_u64, LittleEndian::write_u64);
impl_codecs!(i32, 4, LittleEndian::read_i32, LittleEndian::write_i32);
impl_codecs!(i64, 8, LittleEndian::read_i64, LittleEndian::write_i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_i32() {
        let mut buf = [0u8; 4];
        KeyCodec::encode(&-7i32, &mut buf);
        assert_eq!(<i32 as KeyCodec>::decode(&buf), -7);
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let mut buf = [0u8; 8];
        ValueCodec::encode(&0x0102_0304_0506_0708u64, &mut buf);
        assert_eq!(buf, [8, 7, 6, 5, 4, 3, 2, 1]);
    }
}
