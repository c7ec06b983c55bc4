//! The archive object owning the node tree and its backing stream.

use std::{
    fmt::{self, Debug},
    io::{Read, Seek},
};

use tracing::instrument;

use crate::{
    buffer::BufferData,
    container::ContainerData,
    error::{Error, Result},
    node::{Node, NodeId, NodeKind, Nodes},
    temp::TempStore,
    types::Tag,
};

/// A seekable byte source an archive can keep reading buffers from
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An editable chunk archive
///
/// Holds every node of the tree, rooted at [`ChunkArchive::root`], and, for archives that were loaded,
/// the stream buffers are lazily read from.
///
/// ```no_run
/// # fn doit() -> chnk::error::Result<()> {
/// use chnk::{ChunkArchive, Tag};
///
/// let mut archive = ChunkArchive::open("model.chnk")?;
/// let root = archive.root();
///
/// let note = archive.create_buffer(Tag::from_bytes(*b"NOTE"));
/// archive.set_buffer(note, b"edited".to_vec())?;
/// archive.children_mut(root)?.push(note)?;
///
/// archive.save("model.chnk")?;
/// # Ok(())
/// # }
/// ```
pub struct ChunkArchive {
    pub(crate) nodes: Nodes,
    pub(crate) root: NodeId,
    pub(crate) temp_store: TempStore,
    pub(crate) backing: Option<Box<dyn ReadSeek>>,
    pub(crate) compressed: bool,
}

impl Debug for ChunkArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChunkArchive")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("backed", &self.backing.is_some())
            .field("compressed", &self.compressed)
            .finish()
    }
}

impl ChunkArchive {
    /// Create an empty archive using the process-wide temp store
    pub fn new() -> Result<ChunkArchive> {
        Ok(Self::with_temp_store(TempStore::global()?))
    }

    /// Create an empty archive paging oversized payloads to `temp_store`
    pub fn with_temp_store(temp_store: TempStore) -> ChunkArchive {
        let mut nodes = Nodes::default();
        let root = nodes.insert(Node::new(
            Tag::default(),
            NodeKind::Container(ContainerData::default()),
        ));

        ChunkArchive {
            nodes,
            root,
            temp_store,
            backing: None,
            compressed: false,
        }
    }

    /// The root container
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The temp store oversized payloads are paged to
    pub fn temp_store(&self) -> &TempStore {
        &self.temp_store
    }

    /// Whether the archive was loaded with the compressed flag set
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Version of the root container, without the compressed flag
    pub fn version(&self) -> u32 {
        self.nodes
            .get(self.root)
            .ok()
            .and_then(Node::container)
            .map_or(crate::types::CHUNK_VERSION, |c| c.version)
    }

    /// Whether buffers can still be read from a backing stream
    pub fn is_backed(&self) -> bool {
        self.backing.is_some()
    }

    /// Drop the backing stream
    ///
    /// Buffers that were never read or replaced can no longer be read afterwards.
    pub fn close(&mut self) {
        self.backing = None;
    }

    /// Create a container that belongs to no other container yet
    pub fn create_container(&mut self, tag: impl Into<Tag>) -> NodeId {
        self.nodes.insert(Node::new(
            tag.into(),
            NodeKind::Container(ContainerData::default()),
        ))
    }

    /// Create an empty buffer that belongs to no container yet
    pub fn create_buffer(&mut self, tag: impl Into<Tag>) -> NodeId {
        self.nodes
            .insert(Node::new(tag.into(), NodeKind::Buffer(BufferData::default())))
    }

    /// Destroy a node that belongs to no container, along with everything below it
    ///
    /// Nodes inside a container are destroyed through [`crate::collection::Children`].
    #[instrument(skip(self), err)]
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get(id)?;
        if node.parent.is_some() || id == self.root {
            return Err(Error::AlreadyParented(id));
        }
        self.destroy_subtree(id)
    }

    /// Children of a container, in order
    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.container(id)?.children)
    }

    /// First child of a container with the given tag
    pub fn find_child(&self, id: NodeId, tag: impl Into<Tag>) -> Result<Option<NodeId>> {
        let tag = tag.into();
        for child in self.children(id)? {
            if self.nodes.get(*child)?.tag == tag {
                return Ok(Some(*child));
            }
        }
        Ok(None)
    }

    /// Every node below `id`, depth first, parents before their children
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if current != id {
                result.push(current);
            }
            if let Some(container) = self.nodes.get(current)?.container() {
                stack.extend(container.children.iter().rev());
            }
        }
        Ok(result)
    }

    pub(crate) fn container(&self, id: NodeId) -> Result<&ContainerData> {
        self.nodes.get(id)?.container().ok_or(Error::NotAContainer(id))
    }

    pub(crate) fn container_mut(&mut self, id: NodeId) -> Result<&mut ContainerData> {
        self.nodes
            .get_mut(id)?
            .container_mut()
            .ok_or(Error::NotAContainer(id))
    }

    /// Remove a node and everything below it from the arena
    ///
    /// Dropping the nodes releases their temp store slots.
    pub(crate) fn destroy_subtree(&mut self, id: NodeId) -> Result<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self
                .nodes
                .remove(current)
                .ok_or(Error::NodeNotFound(current))?;
            if let NodeKind::Container(container) = node.kind {
                stack.extend(container.children);
            }
        }
        Ok(())
    }
}
