//! Identity and metadata shared by every member of the tree.

use std::{borrow::Cow, fmt};

use tracing::instrument;

use crate::{
    archive::ChunkArchive,
    buffer::BufferData,
    container::ContainerData,
    error::{Error, Result},
    types::{Alignment, Tag, MAX_DESCRIPTION_LEN},
};

/// Handle to a node owned by a [`ChunkArchive`]
///
/// Ids stay valid until their node is destroyed. A destroyed node's id is never handed out again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// What a node holds
#[derive(Debug)]
pub enum NodeKind {
    /// Ordered child nodes
    Container(ContainerData),

    /// Raw payload bytes
    Buffer(BufferData),
}

/// A member of the tree
#[derive(Debug)]
pub struct Node {
    pub(crate) tag: Tag,
    pub(crate) alignment: Alignment,
    pub(crate) description: Vec<u8>,
    pub(crate) description_set: bool,
    pub(crate) version: u8,
    pub(crate) reserved: u8,
    pub(crate) offset: u64,
    pub(crate) dirty: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(tag: Tag, kind: NodeKind) -> Self {
        Self {
            tag,
            alignment: Alignment::default(),
            description: Vec::new(),
            description_set: false,
            version: 0,
            reserved: 0,
            offset: 0,
            dirty: false,
            parent: None,
            kind,
        }
    }

    /// Identifier of this node
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Alignment class of this node's offset
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Description, lossily decoded as UTF-8
    pub fn description(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.description)
    }

    /// Description in its raw byte representation
    pub fn description_raw(&self) -> &[u8] {
        &self.description
    }

    /// Per-entry version byte
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Reserved byte
    pub fn reserved(&self) -> u8 {
        self.reserved
    }

    /// Offset relative to the enclosing container
    ///
    /// Only meaningful once the enclosing container's size has been computed.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether this node's offset or size is stale
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The container owning this node
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// What this node holds
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Whether this node is a container
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    /// Whether this node is a buffer
    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, NodeKind::Buffer(_))
    }

    pub(crate) fn description_len(&self) -> u64 {
        self.description.len() as u64
    }

    pub(crate) fn container(&self) -> Option<&ContainerData> {
        match &self.kind {
            NodeKind::Container(c) => Some(c),
            NodeKind::Buffer(_) => None,
        }
    }

    pub(crate) fn container_mut(&mut self) -> Option<&mut ContainerData> {
        match &mut self.kind {
            NodeKind::Container(c) => Some(c),
            NodeKind::Buffer(_) => None,
        }
    }

    pub(crate) fn buffer(&self) -> Option<&BufferData> {
        match &self.kind {
            NodeKind::Buffer(b) => Some(b),
            NodeKind::Container(_) => None,
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> Option<&mut BufferData> {
        match &mut self.kind {
            NodeKind::Buffer(b) => Some(b),
            NodeKind::Container(_) => None,
        }
    }

    /// Forget everything tying this node to a position in a container
    pub(crate) fn detach(&mut self) {
        self.parent = None;
        self.dirty = false;
        self.offset = 0;
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena owning every node of an archive
#[derive(Debug, Default)]
pub(crate) struct Nodes {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Nodes {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
            .ok_or(Error::NodeNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or(Error::NodeNotFound(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Methods for reading and editing node metadata
impl ChunkArchive {
    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id)
    }

    /// Whether the id refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_ok()
    }

    /// Number of live nodes, including unparented ones
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Set a node's tag
    pub fn set_tag(&mut self, id: NodeId, tag: impl Into<Tag>) -> Result<()> {
        self.nodes.get_mut(id)?.tag = tag.into();
        Ok(())
    }

    /// Set a node's description, truncated to 255 bytes
    ///
    /// The first assignment to a node that does not yet sit in a container leaves it clean.
    #[instrument(skip(self, description), err)]
    pub fn set_description(&mut self, id: NodeId, description: impl AsRef<[u8]>) -> Result<()> {
        let bytes = description.as_ref();
        let bytes = &bytes[..bytes.len().min(MAX_DESCRIPTION_LEN)];

        let node = self.nodes.get_mut(id)?;
        let mark = node.description_set || node.parent.is_some();
        node.description = bytes.to_vec();
        node.description_set = true;

        if mark {
            self.mark_dirty(id)?;
        }
        Ok(())
    }

    /// Set a node's alignment class
    pub fn set_alignment(&mut self, id: NodeId, alignment: Alignment) -> Result<()> {
        let node = self.nodes.get_mut(id)?;
        if node.alignment == alignment {
            return Ok(());
        }
        node.alignment = alignment;
        node.offset = 0;
        self.mark_dirty(id)
    }

    /// Set a node's per-entry version byte
    pub fn set_version(&mut self, id: NodeId, version: u8) -> Result<()> {
        self.nodes.get_mut(id)?.version = version;
        Ok(())
    }

    /// Set a node's reserved byte
    pub fn set_reserved(&mut self, id: NodeId, reserved: u8) -> Result<()> {
        self.nodes.get_mut(id)?.reserved = reserved;
        Ok(())
    }

    /// Offset of a node from the start of the archive
    ///
    /// Sums the local offsets of the node and all of its ancestors, so it is only accurate once the
    /// root's size has been computed.
    pub fn absolute_offset(&self, id: NodeId) -> Result<u64> {
        let mut total = 0;
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.nodes.get(id)?;
            total += node.offset;
            current = node.parent;
        }
        Ok(total)
    }

    /// Flag a node as stale and tell its ancestors
    ///
    /// Walks up the parent chain marking every container dirty, stopping at the first one that
    /// already is.
    pub(crate) fn mark_dirty(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get_mut(id)?;
        node.dirty = true;

        let mut current = node.parent;
        while let Some(parent) = current {
            let node = self.nodes.get_mut(parent)?;
            if node.dirty {
                break;
            }
            node.dirty = true;
            current = node.parent;
        }
        Ok(())
    }
}
