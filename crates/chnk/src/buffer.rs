//! Leaf nodes holding raw payload bytes.

use tracing::{debug, instrument};

use crate::{
    archive::ChunkArchive,
    compression::decode_payload,
    error::{Error, Result},
    node::NodeId,
    temp::TempSlot,
};

/// Payloads longer than this are kept in a [`crate::temp::TempStore`] slot instead of memory
pub const BUFFER_SPILL_THRESHOLD: usize = 384 * 1024;

/// Where a buffer's bytes currently live
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferLocation {
    /// Held in process memory
    Memory,

    /// Paged out to a temp store slot
    TempStore,

    /// Not read yet, still referencing the archive's backing file
    File,
}

#[derive(Debug)]
pub(crate) enum Payload {
    InMemory(Vec<u8>),
    TempStore(TempSlot),
    FileBacked { offset: u64, len: u64 },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::InMemory(Vec::new())
    }
}

/// Payload of a buffer node
#[derive(Debug, Default)]
pub struct BufferData {
    pub(crate) payload: Payload,
}

impl BufferData {
    pub(crate) fn file_backed(offset: u64, len: u64) -> Self {
        Self {
            payload: Payload::FileBacked { offset, len },
        }
    }

    /// Length of the payload in bytes
    pub fn len(&self) -> Result<u64> {
        match &self.payload {
            Payload::InMemory(data) => Ok(data.len() as u64),
            Payload::TempStore(slot) => slot.len(),
            Payload::FileBacked { len, .. } => Ok(*len),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Where the payload currently lives
    pub fn location(&self) -> BufferLocation {
        match &self.payload {
            Payload::InMemory(_) => BufferLocation::Memory,
            Payload::TempStore(_) => BufferLocation::TempStore,
            Payload::FileBacked { .. } => BufferLocation::File,
        }
    }
}

/// Methods for reading and replacing buffer payloads
impl ChunkArchive {
    /// Read a copy of a buffer's payload
    ///
    /// File-backed payloads are read from the archive's backing stream. For compressed archives the
    /// payload's compression header is handled as described in [`crate::compression`].
    #[instrument(skip(self), err)]
    pub fn buffer(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let (offset, len) = match &self.buffer_data(id)?.payload {
            Payload::InMemory(data) => return Ok(data.clone()),
            Payload::TempStore(slot) => return slot.read(),
            Payload::FileBacked { offset, len } => (*offset, *len),
        };

        let raw = self.read_backing(offset, len)?;
        if self.compressed {
            decode_payload(raw)
        } else {
            Ok(raw)
        }
    }

    /// Replace a buffer's payload
    ///
    /// Payloads longer than [`BUFFER_SPILL_THRESHOLD`] are written to a temp store slot, anything else
    /// stays in memory. The buffer stops referencing the backing file for good and is marked for
    /// re-layout. A failing temp store write leaves the previous payload in place.
    #[instrument(skip(self, data), fields(size = data.len()), err)]
    pub fn set_buffer(&mut self, id: NodeId, data: Vec<u8>) -> Result<()> {
        let store = &self.temp_store;
        let node = self.nodes.get_mut(id)?;
        let buffer = node.buffer_mut().ok_or(Error::NotABuffer(id))?;

        if data.len() > BUFFER_SPILL_THRESHOLD {
            let mut slot = store.allocate()?;
            slot.write(&data)?;
            buffer.payload = Payload::TempStore(slot);
            debug!("spilled {} bytes of {} to the temp store", data.len(), id);
        } else {
            buffer.payload = Payload::InMemory(data);
        }

        node.offset = 0;
        self.mark_dirty(id)
    }

    /// Drop a buffer's payload, leaving it empty
    pub fn clear_buffer(&mut self, id: NodeId) -> Result<()> {
        self.set_buffer(id, Vec::new())
    }

    /// Length of a buffer's payload without reading it
    pub fn buffer_len(&self, id: NodeId) -> Result<u64> {
        self.buffer_data(id)?.len()
    }

    /// Where a buffer's payload currently lives
    pub fn buffer_location(&self, id: NodeId) -> Result<BufferLocation> {
        Ok(self.buffer_data(id)?.location())
    }

    pub(crate) fn buffer_data(&self, id: NodeId) -> Result<&BufferData> {
        self.nodes.get(id)?.buffer().ok_or(Error::NotABuffer(id))
    }
}
