//! Record serialization for spill channels.
//!
//! A [`RecordCodec`] turns records into the opaque byte strings that channels
//! store, and back. The codec also estimates the in-memory footprint of a
//! record, which drives spill decisions.

use std::fmt;
use std::io;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, SpillError};

/// Encodes and decodes records of one type.
pub trait RecordCodec: Send + Sync {
    /// Record type handled by this codec.
    type Record: Send;

    /// Append the encoded form of `record` to `out`.
    fn encode(&self, record: &Self::Record, out: &mut Vec<u8>) -> Result<()>;

    /// Decode one record from exactly `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Record>;

    /// Approximate in-memory size of `record` in bytes.
    fn estimated_size(&self, record: &Self::Record) -> usize;
}

/// Raw byte records.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl RecordCodec for BytesCodec {
    type Record = Vec<u8>;

    fn encode(&self, record: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(record);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn estimated_size(&self, record: &Vec<u8>) -> usize {
        record.len()
    }
}

/// UTF-8 string records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl RecordCodec for Utf8Codec {
    type Record = String;

    fn encode(&self, record: &String, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(record.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| SpillError::Codec(e.to_string()))
    }

    fn estimated_size(&self, record: &String) -> usize {
        record.len()
    }
}

/// Fixed-width `i64` records, big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl RecordCodec for I64Codec {
    type Record = i64;

    fn encode(&self, record: &i64, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&record.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            SpillError::Codec(format!("expected 8 bytes for i64, got {}", bytes.len()))
        })?;
        Ok(i64::from_be_bytes(raw))
    }

    fn estimated_size(&self, _record: &i64) -> usize {
        std::mem::size_of::<i64>()
    }
}

/// JSON records for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a codec.
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> RecordCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    type Record = T;

    fn encode(&self, record: &T, out: &mut Vec<u8>) -> Result<()> {
        serde_json::to_writer(out, record).map_err(|e| SpillError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| SpillError::Codec(e.to_string()))
    }

    /// Length of the JSON encoding, which follows the heap data of strings
    /// and collections.
    fn estimated_size(&self, record: &T) -> usize {
        let mut counter = ByteCounter(0);
        match serde_json::to_writer(&mut counter, record) {
            Ok(()) => counter.0.max(1),
            Err(_) => std::mem::size_of::<T>(),
        }
    }
}

/// Writer that only counts bytes.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_i64_big_endian() {
        let mut out = Vec::new();
        I64Codec.encode(&258, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(I64Codec.decode(&out).unwrap(), 258);
        assert_eq!(I64Codec.estimated_size(&1), 8);
    }

    #[test]
    fn test_i64_wrong_length() {
        let err = I64Codec.decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, SpillError::Codec(_)));
    }

    #[test]
    fn test_utf8_rejects_invalid_bytes() {
        assert_eq!(Utf8Codec.decode(b"hello").unwrap(), "hello");
        assert!(Utf8Codec.decode(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_bytes_appends() {
        let mut out = vec![9];
        BytesCodec.encode(&vec![1, 2], &mut out).unwrap();
        assert_eq!(out, vec![9, 1, 2]);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        name: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Row>::new();
        let row = Row {
            id: 7,
            name: "orders".to_string(),
        };
        let mut out = Vec::new();
        codec.encode(&row, &mut out).unwrap();
        assert_eq!(out, br#"{"id":7,"name":"orders"}"#);
        assert_eq!(codec.decode(&out).unwrap(), row);
        assert!(codec.decode(b"{").is_err());
        assert_eq!(codec.estimated_size(&row), out.len());
    }

    #[test]
    fn test_json_estimate_follows_heap_data() {
        let codec = JsonCodec::<String>::new();
        let small = codec.estimated_size(&"a".to_string());
        let large = codec.estimated_size(&"a".repeat(10_000));
        assert_eq!(small, 3);
        assert_eq!(large, 10_002);
    }
}
