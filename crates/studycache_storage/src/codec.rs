//! CBOR helpers shared by the store and the layers above it.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(StorageError::codec)?;
    Ok(out)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    ciborium::de::from_reader(bytes).map_err(StorageError::codec)
}

/// Serde adapter that stores `Vec<u8>` as a CBOR byte string instead of an
/// array of integers.
///
/// Use with `#[serde(with = "studycache_storage::codec::bytes")]`.
pub mod bytes {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serializes bytes as a byte string.
    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]> + ?Sized,
        S: Serializer,
    {
        serializer.serialize_bytes(bytes.as_ref())
    }

    /// Deserializes a byte string (or a sequence of `u8`).
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn bytes_are_encoded_as_byte_string() {
        let encoded = to_cbor(&Blob {
            data: vec![1, 2, 3],
        })
        .unwrap();
        // map(1), text(4) "data", bytes(3)
        assert_eq!(
            encoded,
            vec![0xa1, 0x64, b'd', b'a', b't', b'a', 0x43, 1, 2, 3]
        );
        let decoded: Blob = from_cbor(&encoded).unwrap();
        assert_eq!(decoded.data, vec![1, 2, 3]);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let result: StorageResult<Blob> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(StorageError::Codec(_))));
    }
}
