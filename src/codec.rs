//! Value/key encoders (spec §4.D). A `Codec` turns a typed value into the
//! raw byte string the tree actually stores; for keys, that byte string is
//! then always run through [`crate::escape::EscapeAlphabet::escape`] before
//! it touches a leaf record.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ArtError, Result};

pub trait Codec<T> {
    fn encode(value: &T, out: &mut Vec<u8>);
    fn decode(bytes: &[u8]) -> Result<T>;
}

macro_rules! fixed_width_int_codec {
    ($ty:ty, $name:ident, $width:expr, $write:path, $read:path) => {
        pub struct $name;
        impl Codec<$ty> for $name {
            fn encode(value: &$ty, out: &mut Vec<u8>) {
                let mut buf = [0u8; $width];
                $write(&mut buf, *value);
                out.extend_from_slice(&buf);
            }
            fn decode(bytes: &[u8]) -> Result<$ty> {
                if bytes.len() != $width {
                    return Err(ArtError::FormatError(format!(
                        "expected {} bytes for {}, got {}",
                        $width,
                        stringify!($ty),
                        bytes.len()
                    )));
                }
                Ok($read(bytes))
            }
        }
    };
}

fixed_width_int_codec!(u16, U16Codec, 2, LittleEndian::write_u16, LittleEndian::read_u16);
fixed_width_int_codec!(u32, U32Codec, 4, LittleEndian::write_u32, LittleEndian::read_u32);
fixed_width_int_codec!(u64, U64Codec, 8, LittleEndian::write_u64, LittleEndian::read_u64);
fixed_width_int_codec!(i16, I16Codec, 2, LittleEndian::write_i16, LittleEndian::read_i16);
fixed_width_int_codec!(i32, I32Codec, 4, LittleEndian::write_i32, LittleEndian::read_i32);
fixed_width_int_codec!(i64, I64Codec, 8, LittleEndian::write_i64, LittleEndian::read_i64);

pub struct U8Codec;
impl Codec<u8> for U8Codec {
    fn encode(value: &u8, out: &mut Vec<u8>) {
        out.push(*value);
    }
    fn decode(bytes: &[u8]) -> Result<u8> {
        match bytes {
            [b] => Ok(*b),
            _ => Err(ArtError::FormatError(format!(
                "expected 1 byte for u8, got {}",
                bytes.len()
            ))),
        }
    }
}

pub struct I8Codec;
impl Codec<i8> for I8Codec {
    fn encode(value: &i8, out: &mut Vec<u8>) {
        out.push(*value as u8);
    }
    fn decode(bytes: &[u8]) -> Result<i8> {
        match bytes {
            [b] => Ok(*b as i8),
            _ => Err(ArtError::FormatError(format!(
                "expected 1 byte for i8, got {}",
                bytes.len()
            ))),
        }
    }
}

pub struct BoolCodec;
impl Codec<bool> for BoolCodec {
    fn encode(value: &bool, out: &mut Vec<u8>) {
        out.push(*value as u8);
    }
    fn decode(bytes: &[u8]) -> Result<bool> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(ArtError::FormatError("expected a single 0/1 byte for bool".into())),
        }
    }
}

/// UTF-8 text, stored as its raw bytes with no length prefix (the record
/// framing around it already carries the length).
pub struct StringCodec;
impl Codec<String> for StringCodec {
    fn encode(value: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }
    fn decode(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ArtError::FormatError(format!("invalid utf-8: {e}")))
    }
}

/// Raw bytes, stored verbatim. The identity codec -- used for keys that are
/// already a byte string, and for opaque values.
pub struct BytesCodec;
impl Codec<Vec<u8>> for BytesCodec {
    fn encode(value: &Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }
    fn decode(bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_codec_roundtrips_little_endian() {
        let mut buf = Vec::new();
        U64Codec::encode(&0x0102030405060708, &mut buf);
        assert_eq!(buf, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(U64Codec::decode(&buf).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn i32_codec_handles_negative_values() {
        let mut buf = Vec::new();
        I32Codec::encode(&-1, &mut buf);
        assert_eq!(I32Codec::decode(&buf).unwrap(), -1);
    }

    #[test]
    fn string_codec_roundtrips_utf8() {
        let mut buf = Vec::new();
        StringCodec::encode(&"héllo".to_string(), &mut buf);
        assert_eq!(StringCodec::decode(&buf).unwrap(), "héllo");
    }

    #[test]
    fn bool_codec_rejects_garbage() {
        assert!(BoolCodec::decode(&[2]).is_err());
    }
}
