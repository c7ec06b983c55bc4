//! Base types for structure of a chunk archive.

use std::fmt;

use binrw::{BinRead, BinWrite};

/// Magic number at the start of every container header
pub const CHUNK_MAGIC: [u8; 4] = *b"CHNK";

/// The only container version this library reads and writes
pub const CHUNK_VERSION: u32 = 1;

/// Bit of the header version marking the payloads as compressed
pub const COMPRESSED_FLAG: u32 = 0x8000_0000;

/// Size of a container header, in bytes
pub const HEADER_SIZE: u64 = 16;

/// Size of a single entry record, in bytes
pub const ENTRY_SIZE: u64 = 16;

/// Pattern tiled over every padding region
pub const FILLER: [u8; 4] = [0xA1, 0xAC, 0x83, 0xDF];

/// Longest description that can be stored for a node
pub const MAX_DESCRIPTION_LEN: usize = u8::MAX as usize;

/// How many containers deep a tree may nest below its top-most container
pub const MAX_NESTING_DEPTH: usize = 256;

/// Container header
///
/// Every container, the root included, starts with "CHNK" followed by its total size, the number of
/// entry records that follow and a version. All data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"CHNK", little)]
pub struct ChunkHeader {
    /// Total size of the container including header, records, data and padding
    pub size: u32,

    /// The number of entry records following the header
    pub children: u32,

    /// Format version, the top bit flags compressed payloads
    pub version: u32,
}

impl ChunkHeader {
    /// Whether the compressed flag is set
    pub fn is_compressed(&self) -> bool {
        self.version & COMPRESSED_FLAG != 0
    }

    /// The version with the compressed flag masked off
    pub fn base_version(&self) -> u32 {
        self.version & !COMPRESSED_FLAG
    }
}

impl Default for ChunkHeader {
    fn default() -> Self {
        Self {
            size: HEADER_SIZE as u32,
            children: 0,
            version: CHUNK_VERSION,
        }
    }
}

/// Entry record
///
/// Describes one child of a container. Offsets are relative to the start of the enclosing container.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ChunkEntry {
    /// Identifier of the child
    pub tag: Tag,

    /// Offset of the child's data from the start of the container
    pub offset: u32,

    /// Per-entry version byte, carried through untouched
    pub version: u8,

    /// Length of the description stored right after the child's data
    pub description_len: u8,

    /// Alignment class of the child's offset
    pub alignment: Alignment,

    /// Reserved byte, carried through untouched
    pub reserved: u8,

    /// Size of the child's data, without the description
    pub size: u32,
}

/// Power of two boundary a child's offset is aligned to
///
/// Stored on disk as the shift amount.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[brw(repr = u8)]
pub enum Alignment {
    /// 4 byte alignment
    #[default]
    Word = 2,

    /// 16 byte alignment
    Paragraph = 4,

    /// 2048 byte alignment
    Sector = 11,

    /// 4096 byte alignment
    Page = 12,
}

impl Alignment {
    /// The shift amount stored on disk
    pub const fn shift(self) -> u32 {
        self as u32
    }

    /// The boundary in bytes
    pub const fn bytes(self) -> u64 {
        1 << self.shift()
    }

    /// Round `value` up to the next multiple of this alignment
    pub const fn align(self, value: u64) -> u64 {
        let mask = self.bytes() - 1;
        (value + mask) & !mask
    }
}

/// 32-bit node identifier
///
/// Tags are usually four character codes, [`Tag::from_bytes`] builds one from the bytes as they appear
/// in the file.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[brw(little)]
pub struct Tag(pub u32);

impl Tag {
    /// Create a tag from its numeric value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Create a tag from the four bytes stored on disk
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// The four bytes stored on disk
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// The numeric value
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<[u8; 4]> for Tag {
    fn from(value: [u8; 4]) -> Self {
        Self::from_bytes(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            bytes.iter().try_for_each(|b| write!(f, "{}", *b as char))
        } else {
            write!(f, "{:#010X}", self.0)
        }
    }
}
