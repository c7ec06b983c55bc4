//! Container nodes and their incremental layout.
//!
//! A container serializes as a header, one entry record per child, then every child's data followed by
//! its description. Each child starts on its alignment boundary and the container's total size is
//! rounded up to the alignment of its last child.
//!
//! Laying out a large container is bounded by the first child with pending changes: every child in
//! front of it keeps the offset it already has and the walk resumes right after it.

use tracing::{debug, instrument};

use crate::{
    archive::ChunkArchive,
    error::Result,
    node::{NodeId, NodeKind},
    types::{Alignment, CHUNK_VERSION, ENTRY_SIZE, HEADER_SIZE},
};

/// Children and cached layout of a container node
#[derive(Debug)]
pub struct ContainerData {
    pub(crate) children: Vec<NodeId>,
    pub(crate) size: u64,
    pub(crate) modified: bool,
    pub(crate) version: u32,
    // Child count the cached layout was computed for
    pub(crate) laid_out: usize,
}

impl Default for ContainerData {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            size: 0,
            modified: false,
            version: CHUNK_VERSION,
            laid_out: 0,
        }
    }
}

impl ContainerData {
    pub(crate) fn loaded(size: u64, version: u32, children: usize) -> Self {
        Self {
            size,
            version,
            laid_out: children,
            ..Default::default()
        }
    }

    /// Children, in order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Size computed by the last layout
    pub fn cached_size(&self) -> u64 {
        self.size
    }

    /// Header version this container is written with
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether the child list changed since the last layout
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Size of the header and entry records of a container with `children` children
pub const fn header_size(children: usize) -> u64 {
    HEADER_SIZE + ENTRY_SIZE * children as u64
}

/// Placement of one child inside its container
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Extent {
    pub alignment: Alignment,
    pub size: u64,
    pub description_len: u64,
    pub offset: u64,
}

impl Extent {
    fn end(&self) -> u64 {
        self.offset + self.size + self.description_len
    }
}

/// Assign offsets to `pending` and return the container's total size
///
/// `anchor` is the clean child right in front of the first pending one, or `None` when the walk
/// starts at the first child.
pub(crate) fn layout(header: u64, anchor: Option<&Extent>, pending: &mut [Extent]) -> u64 {
    let mut running = anchor.map_or(header, Extent::end);
    for child in pending.iter_mut() {
        running = child.alignment.align(running);
        child.offset = running;
        running += child.size + child.description_len;
    }

    match pending.last().or(anchor) {
        Some(last) => last.alignment.align(running),
        None => running,
    }
}

/// Methods for computing sizes and offsets
impl ChunkArchive {
    /// Serialized size of a node
    ///
    /// Buffers report their payload length. Containers lay out their children first, assigning
    /// every child's offset, and only redo the part following the first child with pending
    /// changes. Calling this again without an intervening change returns the cached size.
    pub fn size(&mut self, id: NodeId) -> Result<u64> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Buffer(buffer) => buffer.len(),
            NodeKind::Container(_) => self.container_size(id),
        }
    }

    /// Whether a node, or anything below it, changed since it was last laid out
    pub fn has_pending_changes(&self, id: NodeId) -> Result<bool> {
        let node = self.nodes.get(id)?;
        if node.dirty {
            return Ok(true);
        }

        let Some(container) = node.container() else {
            return Ok(false);
        };
        if container.modified {
            return Ok(true);
        }

        // TODO: memoize per layout pass once deep trees show up in the layout benches
        for child in &container.children {
            if self.has_pending_changes(*child)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Size of a node as of the last layout, without computing anything
    pub(crate) fn cached_size(&self, id: NodeId) -> Result<u64> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Buffer(buffer) => buffer.len(),
            NodeKind::Container(container) => Ok(container.size),
        }
    }

    #[instrument(level = "trace", skip(self), err)]
    fn container_size(&mut self, id: NodeId) -> Result<u64> {
        let container = self.container(id)?;
        let children = container.children.clone();
        let cached = container.size;
        let modified = container.modified;
        let header = header_size(children.len());

        // a different child count moves the end of the header and with it every offset
        let mut first_pending = (container.laid_out != children.len()).then_some(0);
        if first_pending.is_none() {
            for (index, child) in children.iter().enumerate() {
                if self.nodes.get(*child)?.offset == 0 || self.has_pending_changes(*child)? {
                    first_pending = Some(index);
                    break;
                }
            }
        }

        let dirty_index = match first_pending {
            Some(index) => index,
            None if modified || cached < header => children.len(),
            None => {
                self.settle_top(id)?;
                return Ok(cached);
            }
        };

        let anchor = match dirty_index.checked_sub(1) {
            Some(index) => Some(self.extent(children[index])?),
            None => None,
        };
        let mut pending = children[dirty_index..]
            .iter()
            .map(|child| self.extent(*child))
            .collect::<Result<Vec<_>>>()?;

        let size = layout(header, anchor.as_ref(), &mut pending);

        for (child, extent) in children[dirty_index..].iter().zip(&pending) {
            let node = self.nodes.get_mut(*child)?;
            node.offset = extent.offset;
            node.dirty = false;
        }

        let container = self.container_mut(id)?;
        container.size = size;
        container.modified = false;
        container.laid_out = children.len();
        self.settle_top(id)?;

        debug!(
            "laid out {} from child {} of {}, size {}",
            id,
            dirty_index,
            children.len(),
            size
        );
        Ok(size)
    }

    // Nothing above a parentless container would ever clear its dirty flag
    fn settle_top(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get_mut(id)?;
        if node.parent.is_none() {
            node.dirty = false;
        }
        Ok(())
    }

    fn extent(&mut self, id: NodeId) -> Result<Extent> {
        let size = self.size(id)?;
        let node = self.nodes.get(id)?;
        Ok(Extent {
            alignment: node.alignment,
            size,
            description_len: node.description_len(),
            offset: node.offset,
        })
    }
}
