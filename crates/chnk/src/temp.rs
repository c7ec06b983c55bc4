//! Disk-backed overflow storage for oversized payloads.
//!
//! A [`TempStore`] hands out [`TempSlot`]s, each backed by its own file inside the store's directory,
//! created on the slot's first write.
//! Slots are addressed by small integer handles that are recycled once a slot is released.
//!
//! ```no_run
//! # fn doit() -> chnk::error::Result<()> {
//! use chnk::temp::{TempStore, TempStoreOptions};
//!
//! let store = TempStore::new(TempStoreOptions::builder().growth(16).build())?;
//! let mut slot = store.allocate()?;
//! slot.write(&[0u8; 1024])?;
//! assert_eq!(slot.read()?.len(), 1024);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{self, Debug},
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use bon::Builder;
use tempfile::TempDir;
use tracing::{debug, instrument, trace, warn};

use crate::error::Result;

/// Number of handles added to the table whenever it runs out of free entries
pub const DEFAULT_GROWTH: usize = 250;

static GLOBAL: Mutex<Option<TempStore>> = Mutex::new(None);

/// Options for how a [`TempStore`] lays out its files
#[derive(Debug, Clone, Builder)]
pub struct TempStoreOptions {
    /// Directory holding the slot files
    ///
    /// Stale slot files found there are removed when the store starts. When unset, a private
    /// temporary directory is created and deleted again with the store.
    pub directory: Option<PathBuf>,

    /// How many handles to add to the table at once
    #[builder(default = DEFAULT_GROWTH)]
    pub growth: usize,

    /// File name prefix of slot files
    #[builder(default = String::from("chnk"), into)]
    pub prefix: String,
}

impl Default for TempStoreOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct SlotFile {
    // Created on the first write
    file: Option<File>,
    path: PathBuf,
    len: u64,
}

#[derive(Default)]
enum Entry {
    #[default]
    Free,
    Used(SlotFile),
}

impl Entry {
    fn is_free(&self) -> bool {
        matches!(self, Entry::Free)
    }
}

struct Inner {
    directory: PathBuf,
    // Held so the private directory lives as long as the store
    _owned: Option<TempDir>,
    prefix: String,
    growth: usize,
    entries: Vec<Entry>,
    cursor: usize,
}

impl Inner {
    fn slot_path(&self, handle: usize) -> PathBuf {
        self.directory
            .join(format!("{}-{}.tmp", self.prefix, handle))
    }

    fn find_free(&self) -> Option<usize> {
        let start = self.cursor.min(self.entries.len());
        self.entries[start..]
            .iter()
            .position(Entry::is_free)
            .map(|i| i + start)
            .or_else(|| self.entries.iter().position(Entry::is_free))
    }

    fn slot_mut(&mut self, handle: usize) -> Result<&mut SlotFile> {
        match self.entries.get_mut(handle) {
            Some(Entry::Used(slot)) => Ok(slot),
            _ => Err(crate::error::Error::CustomError(format!(
                "temp store handle {handle} is not allocated"
            ))),
        }
    }
}

/// Pool of disk-backed overflow buffers
///
/// Cloning a store is cheap and yields another handle on the same pool.
#[derive(Clone)]
pub struct TempStore {
    inner: Arc<Mutex<Inner>>,
}

impl Debug for TempStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("TempStore")
            .field("directory", &inner.directory)
            .field("capacity", &inner.entries.len())
            .field("cursor", &inner.cursor)
            .finish()
    }
}

impl TempStore {
    /// Start a store, cleaning any stale slot files left in its directory
    #[instrument(err)]
    pub fn new(options: TempStoreOptions) -> Result<TempStore> {
        let (directory, owned) = match options.directory {
            Some(directory) => {
                fs::create_dir_all(&directory)?;
                Self::clean(&directory, &options.prefix)?;
                (directory, None)
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix(&format!("{}-", options.prefix))
                    .tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        debug!("temp store rooted at {}", directory.display());

        Ok(TempStore {
            inner: Arc::new(Mutex::new(Inner {
                directory,
                _owned: owned,
                prefix: options.prefix,
                growth: options.growth.max(1),
                entries: Vec::new(),
                cursor: 0,
            })),
        })
    }

    /// The process-wide store, started with default options on first use
    pub fn global() -> Result<TempStore> {
        let mut global = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = global.as_ref() {
            return Ok(store.clone());
        }

        let store = TempStore::new(TempStoreOptions::default())?;
        *global = Some(store.clone());
        Ok(store)
    }

    /// Drop the process-wide store
    ///
    /// Slots still held elsewhere keep their files until they are released; the next call to
    /// [`TempStore::global`] starts a fresh store.
    pub fn shutdown_global() {
        let store = GLOBAL.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(store);
    }

    /// Directory holding the slot files
    pub fn directory(&self) -> PathBuf {
        self.lock().directory.clone()
    }

    /// Number of handles in the table, free or not
    pub fn capacity(&self) -> usize {
        self.lock().entries.len()
    }

    /// Number of slots currently allocated
    pub fn allocated(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Used(_)))
            .count()
    }

    /// Allocate a new, empty slot
    #[instrument(skip(self), err)]
    pub fn allocate(&self) -> Result<TempSlot> {
        let mut inner = self.lock();

        let handle = match inner.find_free() {
            Some(handle) => handle,
            None => {
                let handle = inner.entries.len();
                let growth = inner.growth;
                inner.entries.resize_with(handle + growth, Entry::default);
                debug!("grew temp store table to {} handles", inner.entries.len());
                handle
            }
        };

        let path = inner.slot_path(handle);
        inner.entries[handle] = Entry::Used(SlotFile {
            file: None,
            path,
            len: 0,
        });
        inner.cursor = handle + 1;
        trace!(handle, "allocated temp slot");

        Ok(TempSlot {
            handle,
            store: self.clone(),
        })
    }

    fn write(&self, handle: usize, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(handle)?;
        let file = match slot.file.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&slot.path)?,
        };
        let file = slot.file.insert(file);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(data)?;
        file.set_len(data.len() as u64)?;
        slot.len = data.len() as u64;
        trace!(handle, size = data.len(), "wrote temp slot");
        Ok(())
    }

    fn read(&self, handle: usize) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(handle)?;
        let mut buffer = vec![0u8; slot.len as usize];
        if let Some(file) = &mut slot.file {
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buffer)?;
        }
        trace!(handle, size = buffer.len(), "read temp slot");
        Ok(buffer)
    }

    fn len(&self, handle: usize) -> Result<u64> {
        Ok(self.lock().slot_mut(handle)?.len)
    }

    fn release(&self, handle: usize) -> Result<()> {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(handle) else {
            return Ok(());
        };
        if let Entry::Used(slot) = std::mem::take(entry) {
            if let Some(file) = slot.file {
                drop(file);
                fs::remove_file(&slot.path)?;
            }
            trace!(handle, "released temp slot");
        }
        Ok(())
    }

    fn clean(directory: &Path, prefix: &str) -> Result<()> {
        let stale_prefix = format!("{prefix}-");
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let is_stale = name
                .to_str()
                .map_or(false, |n| n.starts_with(&stale_prefix) && n.ends_with(".tmp"));
            if is_stale && entry.file_type()?.is_file() {
                debug!("removing stale slot file {}", entry.path().display());
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An allocated slot of a [`TempStore`]
///
/// The slot's file is deleted and its handle recycled when this is dropped.
pub struct TempSlot {
    handle: usize,
    store: TempStore,
}

impl Debug for TempSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TempSlot({})", self.handle)
    }
}

impl TempSlot {
    /// Handle of this slot inside its store
    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Replace the slot's content
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.store.write(self.handle, data)
    }

    /// Read the slot's content
    pub fn read(&self) -> Result<Vec<u8>> {
        self.store.read(self.handle)
    }

    /// Length of the slot's content
    pub fn len(&self) -> Result<u64> {
        self.store.len(self.handle)
    }

    /// Whether the slot holds no data
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Drop for TempSlot {
    fn drop(&mut self) {
        if let Err(e) = self.store.release(self.handle) {
            warn!(handle = self.handle, "unable to release temp slot: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{TempStore, TempStoreOptions};
    use crate::error::Result;

    fn store(growth: usize) -> Result<(tempfile::TempDir, TempStore)> {
        let dir = tempfile::tempdir()?;
        let store = TempStore::new(
            TempStoreOptions::builder()
                .directory(dir.path().to_path_buf())
                .growth(growth)
                .build(),
        )?;
        Ok((dir, store))
    }

    #[traced_test]
    #[test]
    fn write_then_read() -> Result<()> {
        let (_dir, store) = store(4)?;

        let mut slot = store.allocate()?;
        slot.write(b"hello world")?;
        assert_eq!(slot.read()?, b"hello world".to_vec());
        assert_eq!(slot.len()?, 11);

        slot.write(b"bye")?;
        assert_eq!(slot.read()?, b"bye".to_vec());
        assert_eq!(slot.len()?, 3);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn table_grows_in_batches() -> Result<()> {
        let (_dir, store) = store(3)?;

        let slots = (0..4).map(|_| store.allocate()).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            slots.iter().map(|s| s.handle()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(store.capacity(), 6);
        assert_eq!(store.allocated(), 4);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn handles_are_recycled() -> Result<()> {
        let (_dir, store) = store(3)?;

        let first = store.allocate()?;
        let second = store.allocate()?;
        let third = store.allocate()?;
        assert_eq!(third.handle(), 2);

        drop(second);
        // nothing is free at or above the cursor, the scan wraps to the start
        let reused = store.allocate()?;
        assert_eq!(reused.handle(), 1);
        assert_eq!(store.capacity(), 3);

        drop(first);
        drop(third);
        let next = store.allocate()?;
        assert_eq!(next.handle(), 2);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn release_deletes_file() -> Result<()> {
        let (dir, store) = store(2)?;

        let mut slot = store.allocate()?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        assert!(slot.is_empty()?);
        assert!(slot.read()?.is_empty());

        slot.write(&[1, 2, 3])?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        drop(slot);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        assert_eq!(store.allocated(), 0);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn unwritten_slot_releases_cleanly() -> Result<()> {
        let (dir, store) = store(2)?;

        let slot = store.allocate()?;
        drop(slot);

        assert_eq!(store.allocated(), 0);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        assert!(!logs_contain("unable to release"));

        Ok(())
    }

    #[traced_test]
    #[test]
    fn released_slot_reports_lookup_error() -> Result<()> {
        let (_dir, store) = store(2)?;

        let mut slot = store.allocate()?;
        slot.write(b"data")?;
        store.release(slot.handle())?;

        assert!(slot.len().is_err());
        assert!(slot.is_empty().is_err());

        Ok(())
    }

    #[traced_test]
    #[test]
    fn startup_removes_stale_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("chnk-7.tmp"), b"stale")?;
        std::fs::write(dir.path().join("keep.bin"), b"mine")?;

        let _store = TempStore::new(
            TempStoreOptions::builder()
                .directory(dir.path().to_path_buf())
                .build(),
        )?;

        assert!(!dir.path().join("chnk-7.tmp").exists());
        assert!(dir.path().join("keep.bin").exists());

        Ok(())
    }
}
