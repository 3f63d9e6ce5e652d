//! Snapshot codec boundary.
//!
//! Wire layout: 4-byte magic, 1 format byte, then the CBOR body (optionally
//! zstd-compressed). Encoding is deterministic for identical input.

use std::io::{Read, Write};

use groundcover_kernel::{Dataset, DatasetDiff, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const MAGIC: [u8; 4] = *b"GCVR";
const FORMAT_CBOR: u8 = 1;
const FORMAT_CBOR_ZSTD: u8 = 2;
const HEADER_LEN: usize = MAGIC.len() + 1;

/// Errors from encoding or decoding snapshot bytes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("CBOR deserialization error: {0}")]
    Decode(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("input is {0} bytes, too short for a header")]
    Truncated(usize),
    #[error("bad magic, not a groundcover payload")]
    BadMagic,
    #[error("unsupported payload format {0}")]
    UnsupportedFormat(u8),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("decoded dataset is invalid: {0}")]
    Invalid(#[from] StoreError),
}

/// Pluggable, deterministic serializer.
pub trait Codec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Must reject malformed input rather than return a partial value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Decode and check that record ids match their indices.
    fn decode_dataset(&self, bytes: &[u8]) -> Result<Dataset, CodecError> {
        let dataset: Dataset = self.decode(bytes)?;
        dataset.validate()?;
        Ok(dataset)
    }

    fn decode_diff(&self, bytes: &[u8]) -> Result<DatasetDiff, CodecError> {
        self.decode(bytes)
    }
}

/// CBOR codec with optional zstd compression of the body.
#[derive(Debug, Clone, Copy)]
pub struct CborCodec {
    zstd_level: Option<i32>,
}

impl CborCodec {
    pub fn plain() -> Self {
        Self { zstd_level: None }
    }

    pub fn compressed(level: i32) -> Self {
        Self {
            zstd_level: Some(level),
        }
    }
}

impl Default for CborCodec {
    fn default() -> Self {
        Self::compressed(3)
    }
}

impl Codec for CborCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let cbor = cbor_serialize(value)?;
        let (format, body) = match self.zstd_level {
            Some(level) => (FORMAT_CBOR_ZSTD, zstd_compress(&cbor, level)?),
            None => (FORMAT_CBOR, cbor),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&MAGIC);
        out.push(format);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Accepts either format regardless of how this codec encodes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated(bytes.len()));
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let body = &bytes[HEADER_LEN..];
        match bytes[MAGIC.len()] {
            FORMAT_CBOR => cbor_deserialize(body),
            FORMAT_CBOR_ZSTD => cbor_deserialize(&zstd_decompress(body)?),
            other => Err(CodecError::UnsupportedFormat(other)),
        }
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let mut rest = data;
    let value = ciborium::from_reader(&mut rest).map_err(|e| CodecError::Decode(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes(rest.len()));
    }
    Ok(value)
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    let compress = || -> std::io::Result<Vec<u8>> {
        let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
        encoder.write_all(data)?;
        encoder.finish()
    };
    compress().map_err(|e| CodecError::Compression(e.to_string()))
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let decompress = || -> std::io::Result<Vec<u8>> {
        let mut decoder = zstd::Decoder::new(data)?;
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok(buf)
    };
    decompress().map_err(|e| CodecError::Compression(e.to_string()))
}
