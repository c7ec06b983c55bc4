//! The owning collection: the only way to change a container's children.

use tracing::{debug, instrument};

use crate::{
    archive::ChunkArchive,
    error::{Error, Result},
    node::NodeId,
    types::MAX_NESTING_DEPTH,
};

/// Mutable view on the children of one container
///
/// Obtained from [`ChunkArchive::children_mut`]. Every change keeps parent links consistent, marks the
/// affected child for re-layout and notifies the containers above.
///
/// ```
/// # fn doit() -> chnk::error::Result<()> {
/// use chnk::{temp::{TempStore, TempStoreOptions}, ChunkArchive, Tag};
///
/// let mut archive = ChunkArchive::with_temp_store(TempStore::new(TempStoreOptions::default())?);
/// let root = archive.root();
/// let name = archive.create_buffer(Tag::from_bytes(*b"NAME"));
///
/// archive.children_mut(root)?.push(name)?;
/// assert_eq!(archive.children(root)?, &[name]);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug)]
pub struct Children<'a> {
    archive: &'a mut ChunkArchive,
    container: NodeId,
}

impl ChunkArchive {
    /// Mutable access to the children of a container
    pub fn children_mut(&mut self, container: NodeId) -> Result<Children<'_>> {
        self.container(container)?;
        Ok(Children {
            archive: self,
            container,
        })
    }
}

impl Children<'_> {
    /// The container whose children are edited
    pub fn container(&self) -> NodeId {
        self.container
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    /// Whether the container has no children
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Child at `index`
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.ids().get(index).copied()
    }

    /// Append a child
    pub fn push(&mut self, node: NodeId) -> Result<()> {
        let index = self.len();
        self.insert(index, node)
    }

    /// Insert a child at `index`, shifting everything after it
    #[instrument(skip(self), fields(container = %self.container), err)]
    pub fn insert(&mut self, index: usize, node: NodeId) -> Result<()> {
        self.check_insertable(node)?;
        let len = self.len();
        if index > len {
            return Err(Error::IndexOutOfBounds { index, len });
        }

        self.ids_mut()?.insert(index, node);
        self.adopt(node)?;
        self.notify_modified()
    }

    /// Put `node` in place of the child at `index`, destroying the old child
    #[instrument(skip(self), fields(container = %self.container), err)]
    pub fn replace(&mut self, index: usize, node: NodeId) -> Result<()> {
        self.check_insertable(node)?;
        let old = self.child(index)?;

        self.ids_mut()?[index] = node;
        self.archive.nodes.get_mut(old)?.detach();
        self.archive.destroy_subtree(old)?;
        self.adopt(node)?;
        self.notify_modified()
    }

    /// Remove and destroy the child at `index`
    ///
    /// The child's temp store slots are released along with everything below it.
    #[instrument(skip(self), fields(container = %self.container), err)]
    pub fn remove(&mut self, index: usize) -> Result<()> {
        let node = self.detach(index)?;
        self.archive.destroy_subtree(node)
    }

    /// Take the child at `index` out of the container without destroying it
    ///
    /// The returned node belongs to no container and can be inserted elsewhere.
    #[instrument(skip(self), fields(container = %self.container), err)]
    pub fn detach(&mut self, index: usize) -> Result<NodeId> {
        let node = self.child(index)?;

        self.ids_mut()?.remove(index);
        self.archive.nodes.get_mut(node)?.detach();
        if let Some(next) = self.get(index) {
            self.invalidate(next)?;
        }
        self.notify_modified()?;
        Ok(node)
    }

    /// Remove and destroy every child
    #[instrument(skip(self), fields(container = %self.container), err)]
    pub fn clear(&mut self) -> Result<()> {
        let children = std::mem::take(self.ids_mut()?);
        for child in children {
            self.archive.nodes.get_mut(child)?.detach();
            self.archive.destroy_subtree(child)?;
        }
        self.notify_modified()
    }

    fn ids(&self) -> &[NodeId] {
        self.archive
            .container(self.container)
            .map(|c| c.children.as_slice())
            .unwrap_or_default()
    }

    fn ids_mut(&mut self) -> Result<&mut Vec<NodeId>> {
        Ok(&mut self.archive.container_mut(self.container)?.children)
    }

    fn child(&self, index: usize) -> Result<NodeId> {
        self.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.len(),
        })
    }

    fn check_insertable(&self, node: NodeId) -> Result<()> {
        let candidate = self.archive.node(node)?;
        if candidate.parent.is_some() || node == self.archive.root {
            return Err(Error::AlreadyParented(node));
        }

        // the inserted node lands one level below the container
        let mut level = 0;
        let mut current = Some(self.container);
        while let Some(id) = current {
            if id == node {
                return Err(Error::WouldCreateCycle(node));
            }
            level += 1;
            current = self.archive.node(id)?.parent;
        }

        if candidate.is_container() {
            let deepest = level + self.container_height(node)?;
            if deepest > MAX_NESTING_DEPTH {
                return Err(Error::NestingTooDeep(deepest));
            }
        }
        Ok(())
    }

    /// Levels of containers below `node`, zero when it holds none
    fn container_height(&self, node: NodeId) -> Result<usize> {
        let mut height = 0;
        let mut stack = vec![(node, 0)];
        while let Some((id, depth)) = stack.pop() {
            height = height.max(depth);
            for &child in self.archive.children(id)? {
                if self.archive.node(child)?.is_container() {
                    stack.push((child, depth + 1));
                }
            }
        }
        Ok(height)
    }

    fn adopt(&mut self, node: NodeId) -> Result<()> {
        self.archive.nodes.get_mut(node)?.parent = Some(self.container);
        self.invalidate(node)
    }

    fn invalidate(&mut self, node: NodeId) -> Result<()> {
        let node = self.archive.nodes.get_mut(node)?;
        node.dirty = true;
        node.offset = 0;
        Ok(())
    }

    /// Tell the container and the ones above it that the child list changed
    ///
    /// Stops at the first ancestor that already knows about pending changes. Reaching the top of
    /// the tree lays it out again.
    fn notify_modified(&mut self) -> Result<()> {
        let container = self.archive.container_mut(self.container)?;
        if container.modified {
            return Ok(());
        }
        container.modified = true;

        let mut current = self.container;
        loop {
            let node = self.archive.nodes.get_mut(current)?;
            let Some(parent) = node.parent else {
                break;
            };
            if node.dirty {
                return Ok(());
            }
            node.dirty = true;
            current = parent;
        }

        let size = self.archive.size(current)?;
        debug!(
            "recomputed {} after change to {}, size {}",
            current, self.container, size
        );
        Ok(())
    }
}
