//! Types for reading chunk archives
//!

use binrw::BinRead;
use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};
use tracing::{debug, instrument};

use crate::{
    archive::ChunkArchive,
    buffer::BufferData,
    container::{header_size, ContainerData},
    error::{Error, Result},
    node::{Node, NodeId, NodeKind},
    temp::TempStore,
    types::{ChunkEntry, ChunkHeader, CHUNK_MAGIC, CHUNK_VERSION, MAX_NESTING_DEPTH},
};

/// Methods for loading archives
impl ChunkArchive {
    /// Open an archive file, paging oversized payloads to the process-wide temp store
    ///
    /// The file stays open: buffer payloads are only read when asked for.
    pub fn open(path: impl AsRef<Path>) -> Result<ChunkArchive> {
        Self::open_with_temp_store(path, TempStore::global()?)
    }

    /// Open an archive file, paging oversized payloads to `temp_store`
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open_with_temp_store(
        path: impl AsRef<Path>,
        temp_store: TempStore,
    ) -> Result<ChunkArchive> {
        let file = File::open(path.as_ref())?;
        Self::from_reader_with_temp_store(BufReader::new(file), temp_store)
    }

    /// Read an archive from any seekable stream, using the process-wide temp store
    pub fn from_reader<R: Read + Seek + Send + 'static>(reader: R) -> Result<ChunkArchive> {
        Self::from_reader_with_temp_store(reader, TempStore::global()?)
    }

    /// Read an archive from any seekable stream
    ///
    /// The whole tree is parsed up front; the stream is kept to read buffer payloads later on.
    #[instrument(skip_all, err)]
    pub fn from_reader_with_temp_store<R: Read + Seek + Send + 'static>(
        mut reader: R,
        temp_store: TempStore,
    ) -> Result<ChunkArchive> {
        let header = read_header(&mut reader, 0)?;

        let mut archive = ChunkArchive::with_temp_store(temp_store);
        archive.compressed = header.is_compressed();
        let root = archive.root;
        if let NodeKind::Container(container) = &mut archive.nodes.get_mut(root)?.kind {
            *container = ContainerData::loaded(
                header.size as u64,
                header.base_version(),
                header.children as usize,
            );
        }

        archive.read_children(&mut reader, 0, &header, root, 0)?;
        debug!(
            "loaded {} nodes, compressed: {}",
            archive.nodes.len(),
            archive.compressed
        );

        archive.backing = Some(Box::new(reader));
        Ok(archive)
    }

    /// Parse the entries of the container at `base`, which sits `level` containers below the root
    fn read_children<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        base: u64,
        header: &ChunkHeader,
        container: NodeId,
        level: usize,
    ) -> Result<()> {
        reader.seek(SeekFrom::Start(base + header_size(0)))?;
        let entries = (0..header.children)
            .map(|_| ChunkEntry::read(reader).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        let records_end = header_size(entries.len());
        for entry in entries {
            if (entry.offset as u64) < records_end {
                return Err(Error::InvalidEntry {
                    tag: entry.tag,
                    offset: entry.offset,
                });
            }
            let start = base + entry.offset as u64;

            let mut description = vec![0u8; entry.description_len as usize];
            if !description.is_empty() {
                reader.seek(SeekFrom::Start(start + entry.size as u64))?;
                reader.read_exact(&mut description)?;
            }

            let nested = if is_container(reader, start, entry.size)? {
                if level + 1 > MAX_NESTING_DEPTH {
                    return Err(Error::NestingTooDeep(level + 1));
                }
                Some(read_header(reader, start)?)
            } else {
                None
            };
            let kind = match &nested {
                Some(nested) => NodeKind::Container(ContainerData::loaded(
                    nested.size as u64,
                    nested.base_version(),
                    nested.children as usize,
                )),
                None => NodeKind::Buffer(BufferData::file_backed(start, entry.size as u64)),
            };

            let mut node = Node::new(entry.tag, kind);
            node.alignment = entry.alignment;
            node.description = description;
            node.description_set = entry.description_len > 0;
            node.version = entry.version;
            node.reserved = entry.reserved;
            node.offset = entry.offset as u64;
            node.parent = Some(container);

            let id = self.nodes.insert(node);
            self.container_mut(container)?.children.push(id);

            if let Some(nested) = nested {
                self.read_children(reader, start, &nested, id, level + 1)?;
            }
        }

        Ok(())
    }

    /// Read raw bytes from the backing stream
    pub(crate) fn read_backing(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let reader = self.backing.as_mut().ok_or(Error::SourceClosed)?;
        reader.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len as usize];
        reader.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}

/// Read and validate the container header at `position`
fn read_header<R: Read + Seek>(reader: &mut R, position: u64) -> Result<ChunkHeader> {
    reader.seek(SeekFrom::Start(position))?;
    let header = ChunkHeader::read(reader).map_err(|e| match e {
        binrw::Error::BadMagic { .. } => Error::InvalidMagic { position },
        e => Error::from(e),
    })?;

    if header.base_version() != CHUNK_VERSION {
        return Err(Error::UnsupportedVersion(header.base_version()));
    }
    Ok(header)
}

/// Whether the data at `start` begins with the chunk magic
fn is_container<R: Read + Seek>(reader: &mut R, start: u64, size: u32) -> Result<bool> {
    if (size as usize) < CHUNK_MAGIC.len() {
        return Ok(false);
    }

    reader.seek(SeekFrom::Start(start))?;
    let magic = reader.read_u32::<LittleEndian>()?;
    Ok(magic == u32::from_le_bytes(CHUNK_MAGIC))
}
