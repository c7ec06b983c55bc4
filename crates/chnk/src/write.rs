//! Types for writing chunk archives
//!

use binrw::BinWrite;
use std::{
    io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::{
    archive::ChunkArchive,
    buffer::Payload,
    compression::{payload_method, CompressionMethod, COMPRESSION_HEADER_SIZE},
    container::header_size,
    error::{Error, Result},
    node::NodeId,
    types::{ChunkEntry, ChunkHeader, FILLER},
};

/// Methods for serializing archives
impl ChunkArchive {
    /// Lay out the whole tree and write it to `writer`
    ///
    /// Buffers that were never touched are streamed from the backing stream, so it has to stay open
    /// until this returns. An archive that was loaded compressed is written uncompressed, which fails
    /// with [`Error::UnsupportedCodec`] when one of its payloads cannot be decoded.
    #[instrument(skip_all, err)]
    pub fn write_to<W: Write>(&mut self, mut writer: W) -> Result<W> {
        if self.compressed {
            self.materialize()?;
        }

        let root = self.root;
        self.container_mut(root)?.modified = true;
        let size = self.size(root)?;
        debug!("writing archive of {} bytes", size);

        self.write_container(root, &mut writer)?;
        writer.flush()?;
        Ok(writer)
    }

    /// Write the archive to `path`
    ///
    /// The data goes to a temporary file next to `path` that replaces it once everything was
    /// written, so a failing save leaves an existing file untouched. Saving over the file the archive
    /// was opened from is fine: the backing stream keeps reading the replaced file.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let file = NamedTempFile::new_in(directory)?;
        let writer = self.write_to(BufWriter::new(file))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.persist(path).map_err(|e| e.error)?;

        Ok(())
    }

    /// Pull every file-backed payload of a compressed archive through the read path
    ///
    /// Fails without touching anything when a payload uses a codec that cannot be decoded, since
    /// writing it back with the compressed flag cleared would mislabel its bytes.
    fn materialize(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        for id in self.descendants(self.root)? {
            if let Some(Payload::FileBacked { offset, len }) =
                self.nodes.get(id)?.buffer().map(|b| &b.payload)
            {
                pending.push((id, *offset, *len));
            }
        }

        for (id, offset, len) in &pending {
            let head = self.read_backing(*offset, (*len).min(COMPRESSION_HEADER_SIZE as u64))?;
            if let Some(CompressionMethod::Unsupported(codec)) = payload_method(&head)? {
                return Err(Error::UnsupportedCodec { node: *id, codec });
            }
        }

        for (id, _, _) in &pending {
            let data = self.buffer(*id)?;
            self.set_buffer(*id, data)?;
        }

        self.compressed = false;
        debug!("materialized {} compressed buffers", pending.len());
        Ok(())
    }

    fn write_container<W: Write>(&mut self, id: NodeId, writer: &mut W) -> Result<()> {
        let container = self.container(id)?;
        let children = container.children.clone();
        let size = container.size;
        let version = container.version;

        let mut head = Cursor::new(Vec::with_capacity(header_size(children.len()) as usize));
        ChunkHeader {
            size: to_u32(size)?,
            children: to_u32(children.len() as u64)?,
            version,
        }
        .write(&mut head)?;

        for child in &children {
            let child_size = self.cached_size(*child)?;
            let node = self.nodes.get(*child)?;
            ChunkEntry {
                tag: node.tag,
                offset: to_u32(node.offset)?,
                version: node.version,
                description_len: node.description.len() as u8,
                alignment: node.alignment,
                reserved: node.reserved,
                size: to_u32(child_size)?,
            }
            .write(&mut head)?;
        }
        writer.write_all(head.get_ref())?;

        let mut position = header_size(children.len());
        for child in &children {
            let node = self.nodes.get(*child)?;
            let offset = node.offset;
            let is_container = node.is_container();

            let gap = offset.checked_sub(position).ok_or_else(|| {
                Error::CustomError(format!("{child} overlaps the data in front of it"))
            })?;
            pad(writer, gap)?;
            position = offset;

            position += if is_container {
                self.write_container(*child, writer)?;
                self.cached_size(*child)?
            } else {
                self.write_payload(*child, writer)?
            };

            let description = &self.nodes.get(*child)?.description;
            writer.write_all(description)?;
            position += description.len() as u64;
        }

        let tail = size.checked_sub(position).ok_or_else(|| {
            Error::CustomError(format!("children of {id} run past its size of {size}"))
        })?;
        pad(writer, tail)
    }

    fn write_payload<W: Write>(&mut self, id: NodeId, writer: &mut W) -> Result<u64> {
        let (offset, len) = match &self.buffer_data(id)?.payload {
            Payload::InMemory(data) => {
                writer.write_all(data)?;
                return Ok(data.len() as u64);
            }
            Payload::TempStore(slot) => {
                let data = slot.read()?;
                writer.write_all(&data)?;
                return Ok(data.len() as u64);
            }
            Payload::FileBacked { offset, len } => (*offset, *len),
        };

        let reader = self.backing.as_mut().ok_or(Error::SourceClosed)?;
        reader.seek(SeekFrom::Start(offset))?;
        let copied = io::copy(&mut reader.by_ref().take(len), writer)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("backing stream ended after {copied} of {len} bytes of {id}"),
            )
            .into());
        }
        Ok(len)
    }
}

/// Fill `len` bytes with the filler pattern, starting at its first byte
fn pad<W: Write>(writer: &mut W, len: u64) -> Result<()> {
    for index in 0..len {
        writer.write_all(&[FILLER[(index % FILLER.len() as u64) as usize]])?;
    }
    Ok(())
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::SizeOverflow(value))
}
