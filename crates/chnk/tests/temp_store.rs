use chnk::{
    error::Result, BufferLocation, ChunkArchive, Tag, TempStore, TempStoreOptions,
    BUFFER_SPILL_THRESHOLD,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tracing_test::traced_test;

fn store_in(directory: &Path) -> Result<TempStore> {
    TempStore::new(
        TempStoreOptions::builder()
            .directory(directory.to_path_buf())
            .growth(4)
            .prefix("slots")
            .build(),
    )
}

fn slot_files(directory: &Path) -> Result<usize> {
    Ok(std::fs::read_dir(directory)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("slots-"))
        .count())
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[traced_test]
#[test]
fn oversized_payload_survives_save_and_load() -> Result<()> {
    let slots = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;
    let path = output.path().join("large.chnk");
    let store = store_in(slots.path())?;

    let mut archive = ChunkArchive::with_temp_store(store.clone());
    let root = archive.root();
    let large = archive.create_buffer(Tag::from_bytes(*b"LRGE"));
    let small = archive.create_buffer(Tag::from_bytes(*b"SMAL"));

    let large_data = pattern(BUFFER_SPILL_THRESHOLD + 1);
    let small_data = pattern(BUFFER_SPILL_THRESHOLD);
    archive.set_buffer(large, large_data.clone())?;
    archive.set_buffer(small, small_data.clone())?;
    archive.children_mut(root)?.push(large)?;
    archive.children_mut(root)?.push(small)?;

    assert_eq!(archive.buffer_location(large)?, BufferLocation::TempStore);
    assert_eq!(archive.buffer_location(small)?, BufferLocation::Memory);
    assert_eq!(store.allocated(), 1);
    assert_eq!(slot_files(slots.path())?, 1);

    archive.save(&path)?;
    drop(archive);
    assert_eq!(store.allocated(), 0);
    assert_eq!(slot_files(slots.path())?, 0);

    let mut loaded = ChunkArchive::open_with_temp_store(&path, store.clone())?;
    let root = loaded.root();
    let children = loaded.children(root)?.to_vec();
    assert_eq!(loaded.buffer_location(children[0])?, BufferLocation::File);
    assert_eq!(loaded.buffer(children[0])?, large_data);
    assert_eq!(loaded.buffer(children[1])?, small_data);
    // loading never pages anything out
    assert_eq!(store.allocated(), 0);

    Ok(())
}

#[traced_test]
#[test]
fn archives_share_a_store() -> Result<()> {
    let slots = tempfile::tempdir()?;
    let store = store_in(slots.path())?;

    let mut first = ChunkArchive::with_temp_store(store.clone());
    let mut second = ChunkArchive::with_temp_store(store.clone());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = first.create_buffer(Tag::new(1));
        first.set_buffer(id, pattern(BUFFER_SPILL_THRESHOLD + 1))?;
        ids.push(id);
    }
    for _ in 0..3 {
        let id = second.create_buffer(Tag::new(2));
        second.set_buffer(id, pattern(BUFFER_SPILL_THRESHOLD + 2))?;
    }

    assert_eq!(store.allocated(), 6);
    assert_eq!(store.capacity(), 8);

    first.destroy(ids[1])?;
    assert_eq!(store.allocated(), 5);

    // a freed handle is reused before the table grows again
    let id = first.create_buffer(Tag::new(3));
    first.set_buffer(id, pattern(BUFFER_SPILL_THRESHOLD + 3))?;
    let id = first.create_buffer(Tag::new(3));
    first.set_buffer(id, pattern(BUFFER_SPILL_THRESHOLD + 3))?;
    let id = first.create_buffer(Tag::new(3));
    first.set_buffer(id, pattern(BUFFER_SPILL_THRESHOLD + 3))?;
    assert_eq!(store.allocated(), 8);
    assert_eq!(store.capacity(), 8);

    drop(second);
    assert_eq!(store.allocated(), 5);
    assert_eq!(slot_files(slots.path())?, 5);

    Ok(())
}

#[traced_test]
#[test]
fn stale_slot_files_are_removed_on_start() -> Result<()> {
    let slots = tempfile::tempdir()?;
    std::fs::write(slots.path().join("slots-17.tmp"), b"left over")?;
    std::fs::write(slots.path().join("unrelated.txt"), b"keep me")?;

    let store = store_in(slots.path())?;
    assert_eq!(store.directory(), slots.path().to_path_buf());
    assert_eq!(slot_files(slots.path())?, 0);
    assert!(slots.path().join("unrelated.txt").exists());

    Ok(())
}

#[traced_test]
#[test]
fn global_store_is_shared_until_shutdown() -> Result<()> {
    let first = TempStore::global()?;
    let second = TempStore::global()?;
    assert_eq!(first.directory(), second.directory());

    let mut archive = ChunkArchive::new()?;
    assert_eq!(archive.temp_store().directory(), first.directory());

    let buffer = archive.create_buffer(Tag::new(1));
    archive.set_buffer(buffer, pattern(BUFFER_SPILL_THRESHOLD + 1))?;
    assert_eq!(first.allocated(), 1);

    TempStore::shutdown_global();
    // slots held by live archives keep working
    assert_eq!(archive.buffer(buffer)?.len(), BUFFER_SPILL_THRESHOLD + 1);

    let restarted = TempStore::global()?;
    assert_eq!(restarted.allocated(), 0);

    Ok(())
}
