//! Compressed payload handling.
//!
//! When the root header carries [`crate::types::COMPRESSED_FLAG`], every buffer payload starts with a
//! [`CompressionHeader`]. Only the stored codec is understood; anything else is handed back untouched.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use tracing::{instrument, warn};

use crate::error::Result;

/// Size of the [`CompressionHeader`] in bytes
pub const COMPRESSION_HEADER_SIZE: usize = 12;

/// Identifies the codec used for a compressed payload
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Payload follows the sub-header as it is
    Stored,

    /// A codec this library does not implement
    Unsupported(u32),
}

impl From<u32> for CompressionMethod {
    fn from(value: u32) -> Self {
        match value {
            1 => CompressionMethod::Stored,
            other => CompressionMethod::Unsupported(other),
        }
    }
}

impl From<CompressionMethod> for u32 {
    fn from(value: CompressionMethod) -> Self {
        match value {
            CompressionMethod::Stored => 1,
            CompressionMethod::Unsupported(other) => other,
        }
    }
}

/// Sub-header in front of every payload of a compressed archive
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct CompressionHeader {
    /// Codec identifier, see [`CompressionMethod`]
    pub codec: u32,

    /// Size of the payload buffer once padded
    pub padded_size: u32,

    /// Size of the payload including this sub-header
    pub total_size: u32,
}

impl CompressionHeader {
    /// The codec this payload was written with
    pub fn method(&self) -> CompressionMethod {
        self.codec.into()
    }
}

/// Codec of a compressed archive's payload, `None` when it is too short to carry a sub-header
pub fn payload_method(raw: &[u8]) -> Result<Option<CompressionMethod>> {
    if raw.len() < COMPRESSION_HEADER_SIZE {
        return Ok(None);
    }

    let header = CompressionHeader::read(&mut Cursor::new(&raw[..COMPRESSION_HEADER_SIZE]))?;
    Ok(Some(header.method()))
}

/// Turn the raw bytes of a compressed archive's payload into its content
///
/// Stored payloads lose their sub-header. Payloads too short to carry one, or written with an
/// unsupported codec, are returned as they are.
#[instrument(skip(raw), fields(size = raw.len()), err)]
pub fn decode_payload(raw: Vec<u8>) -> Result<Vec<u8>> {
    match payload_method(&raw)? {
        None => {
            warn!("payload is shorter than its compression header, returning raw bytes");
            Ok(raw)
        }
        Some(CompressionMethod::Stored) => {
            let header =
                CompressionHeader::read(&mut Cursor::new(&raw[..COMPRESSION_HEADER_SIZE]))?;
            let end = (header.total_size as usize).clamp(COMPRESSION_HEADER_SIZE, raw.len());
            Ok(raw[COMPRESSION_HEADER_SIZE..end].to_vec())
        }
        Some(CompressionMethod::Unsupported(codec)) => {
            warn!(codec, "compression codec not implemented, returning compressed bytes");
            Ok(raw)
        }
    }
}
