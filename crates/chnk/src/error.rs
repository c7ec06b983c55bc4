//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodeId;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// container header does not start with `CHNK`
    #[error("invalid chunk magic at offset {position}")]
    #[diagnostic(help("the file is not a chunk archive or the offset table is corrupt"))]
    InvalidMagic {
        /// Absolute position of the offending header
        position: u64,
    },

    /// container header carries a version this library cannot read
    #[error("unsupported chunk version {0}")]
    UnsupportedVersion(u32),

    /// entry record points into the header area of its container
    #[error("entry {tag} has offset {offset} inside its container's header")]
    InvalidEntry {
        /// Tag of the offending entry
        tag: crate::types::Tag,
        /// Offset stored in the entry
        offset: u32,
    },

    /// a computed size or offset does not fit the 32-bit on-disk fields
    #[error("value {0} does not fit in a 32-bit chunk field")]
    SizeOverflow(u64),

    /// a compressed payload cannot be decoded, so the archive cannot be written uncompressed
    #[error("cannot rewrite payload of {node} compressed with codec {codec}")]
    #[diagnostic(help("only the stored codec (1) can be rewritten"))]
    UnsupportedCodec {
        /// Buffer holding the payload
        node: NodeId,
        /// Codec identifier from the payload's sub-header
        codec: u32,
    },

    /// containers nest deeper than [`crate::types::MAX_NESTING_DEPTH`]
    #[error("containers nest {0} levels deep, more than supported")]
    NestingTooDeep(usize),

    /// node is already owned by a container
    #[error("node {0} already belongs to a container")]
    AlreadyParented(NodeId),

    /// inserting the node would make a container its own descendant
    #[error("inserting node {0} would create a cycle")]
    WouldCreateCycle(NodeId),

    /// node id is unknown or the node has been destroyed
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),

    /// operation requires a container node
    #[error("node {0} is not a container")]
    NotAContainer(NodeId),

    /// operation requires a buffer node
    #[error("node {0} is not a buffer")]
    NotABuffer(NodeId),

    /// child index past the end of a container
    #[error("index {index} is out of bounds for a container with {len} children")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of children in the container
        len: usize,
    },

    /// buffer is still file-backed but the backing stream has been closed
    #[error("the backing file of this archive has been closed")]
    #[diagnostic(help("read or replace file-backed buffers before closing the archive"))]
    SourceClosed,

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
