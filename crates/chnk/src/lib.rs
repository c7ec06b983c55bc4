//! This library reads, edits and rewrites **chunk archives**: files made of nested, tagged sections.
//!
//! # Chunk Archive Format Documentation
//!
//! A chunk archive is a tree. Every *container* holds an ordered list of children, each of which is
//! either another container or a *buffer* of raw bytes. The root of the file is a container. Archives
//! are loaded without reading any buffer payload; payloads are read from the file when asked for, and
//! only the parts of the tree that changed are laid out again before saving.
//!
//! ## File Structure
//!
//! A container consists of a header, one entry record per child, then the data of every child followed
//! by that child's description. All multi-byte integers are little endian.
//!
//! ### Header
//!
//! | Offset (bytes) | Field       | Description                                                     |
//! |----------------|-------------|-----------------------------------------------------------------|
//! | 0x0000         | Magic       | 4 bytes: "CHNK"                                                 |
//! | 0x0004         | Size        | 4 bytes: Total size of the container, padding included          |
//! | 0x0008         | Child Count | 4 bytes: Number of entry records following the header           |
//! | 0x000C         | Version     | 4 bytes: Format version (`1`), the top bit flags compression    |
//!
//! ### Entry Record
//!
//! | Offset (bytes) | Field              | Description                                              |
//! |----------------|--------------------|----------------------------------------------------------|
//! | 0x0000         | Tag                | 4 bytes: Identifier of the child                         |
//! | 0x0004         | Offset             | 4 bytes: Start of the child, relative to the container   |
//! | 0x0008         | Version            | 1 byte: Carried through untouched                        |
//! | 0x0009         | Description Length | 1 byte: Length of the trailing description               |
//! | 0x000A         | Alignment          | 1 byte: Shift of the child's alignment                   |
//! | 0x000B         | Reserved           | 1 byte: Carried through untouched                        |
//! | 0x000C         | Size               | 4 bytes: Size of the child's data                        |
//!
//! - **Alignment**: the child's offset is a multiple of `1 << shift`. Known shifts are `2` (4 bytes),
//!   `4` (16 bytes), `11` (2048 bytes) and `12` (4096 bytes).
//! - **Description**: raw bytes stored right after the child's data, without a terminator.
//!
//! ### Data
//!
//! A child whose data starts with "CHNK" is a nested container, anything else is a buffer. Gaps in front
//! of aligned children and after the last one are filled with the repeating pattern
//! `A1 AC 83 DF`. A container's size is rounded up to the alignment of its last child.
//!
//! ### Compressed Archives
//!
//! When the root version carries the top bit, every buffer payload starts with a 12 byte sub-header
//! (see [`compression`]). Such archives are written back uncompressed.
//!
//! ## Example
//!
//! ```no_run
//! # fn doit() -> chnk::error::Result<()> {
//! use chnk::{Alignment, ChunkArchive, Tag};
//!
//! let mut archive = ChunkArchive::new()?;
//! let root = archive.root();
//!
//! let text = archive.create_buffer(Tag::from_bytes(*b"TEXT"));
//! archive.set_alignment(text, Alignment::Paragraph)?;
//! archive.set_buffer(text, b"Hello, World!".to_vec())?;
//! archive.set_description(text, "greeting")?;
//! archive.children_mut(root)?.push(text)?;
//!
//! archive.save("hello.chnk")?;
//! # Ok(())
//! # }
//! ```
//!

pub mod archive;
pub mod buffer;
pub mod collection;
pub mod compression;
pub mod container;
pub mod error;
pub mod node;
pub mod read;
pub mod temp;
pub mod types;
pub mod write;

pub use archive::ChunkArchive;
pub use buffer::{BufferLocation, BUFFER_SPILL_THRESHOLD};
pub use collection::Children;
pub use compression::CompressionMethod;
pub use node::{Node, NodeId};
pub use temp::{TempStore, TempStoreOptions};
pub use types::{Alignment, Tag};
