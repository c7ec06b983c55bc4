use chnk::{
    error::{Error, Result},
    Alignment, BufferLocation, ChunkArchive, NodeId, Tag, TempStore, TempStoreOptions,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tracing::info;
use tracing_test::traced_test;

#[derive(Debug, PartialEq)]
struct Snapshot {
    tag: Tag,
    description: Vec<u8>,
    alignment: Alignment,
    size: u64,
    payload: Option<Vec<u8>>,
    children: Vec<Snapshot>,
}

fn snapshot(archive: &mut ChunkArchive, id: NodeId) -> Result<Snapshot> {
    let size = archive.size(id)?;
    let node = archive.node(id)?;
    let tag = node.tag();
    let description = node.description_raw().to_vec();
    let alignment = node.alignment();

    let (payload, children) = if node.is_container() {
        let mut children = Vec::new();
        for child in archive.children(id)?.to_vec() {
            children.push(snapshot(archive, child)?);
        }
        (None, children)
    } else {
        (Some(archive.buffer(id)?), Vec::new())
    };

    Ok(Snapshot {
        tag,
        description,
        alignment,
        size,
        payload,
        children,
    })
}

fn store() -> Result<TempStore> {
    TempStore::new(TempStoreOptions::default())
}

fn add_buffer(
    archive: &mut ChunkArchive,
    parent: NodeId,
    tag: [u8; 4],
    alignment: Alignment,
    data: &[u8],
    description: &str,
) -> Result<NodeId> {
    let id = archive.create_buffer(Tag::from_bytes(tag));
    archive.set_alignment(id, alignment)?;
    archive.set_buffer(id, data.to_vec())?;
    if !description.is_empty() {
        archive.set_description(id, description)?;
    }
    archive.children_mut(parent)?.push(id)?;
    Ok(id)
}

/// A small model: a mesh form holding geometry and materials, plus some loose data
fn build_model(archive: &mut ChunkArchive) -> Result<()> {
    let root = archive.root();

    let mesh = archive.create_container(Tag::from_bytes(*b"MESH"));
    archive.set_alignment(mesh, Alignment::Paragraph)?;
    archive.set_description(mesh, "body")?;
    archive.children_mut(root)?.push(mesh)?;

    let vertices = (0..600u32).flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
    add_buffer(archive, mesh, *b"VERT", Alignment::Paragraph, &vertices, "")?;
    add_buffer(archive, mesh, *b"INDX", Alignment::Word, &[1, 0, 2, 0, 3, 0], "tris")?;

    let materials = archive.create_container(Tag::from_bytes(*b"MTLS"));
    archive.children_mut(mesh)?.push(materials)?;
    add_buffer(archive, materials, *b"MAT0", Alignment::Word, b"steel", "")?;
    add_buffer(archive, materials, *b"MAT1", Alignment::Word, b"glass", "window")?;

    add_buffer(archive, root, *b"NAME", Alignment::Word, b"hover tank", "")?;
    add_buffer(archive, root, *b"TEXR", Alignment::Sector, &[0x7F; 5000], "albedo")?;
    add_buffer(archive, root, *b"EMPT", Alignment::Page, &[], "")?;

    Ok(())
}

fn assert_aligned(archive: &ChunkArchive, id: NodeId) -> Result<()> {
    for child in archive.descendants(id)? {
        let node = archive.node(child)?;
        assert_eq!(node.offset() % node.alignment().bytes(), 0, "{}", node.tag());
    }
    Ok(())
}

fn save_model(path: &Path) -> Result<Snapshot> {
    let mut archive = ChunkArchive::with_temp_store(store()?);
    build_model(&mut archive)?;
    archive.save(path)?;

    let root = archive.root();
    snapshot(&mut archive, root)
}

#[traced_test]
#[test]
fn roundtrip_preserves_tree() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.chnk");

    let expected = save_model(&path)?;
    info!("saved {}", path.display());

    let mut archive = ChunkArchive::open_with_temp_store(&path, store()?)?;
    let root = archive.root();
    assert_eq!(
        archive.size(root)?,
        std::fs::metadata(&path)?.len()
    );
    assert_eq!(snapshot(&mut archive, root)?, expected);
    assert_aligned(&archive, root)?;

    Ok(())
}

#[traced_test]
#[test]
fn resave_untouched_archive_is_identical() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let first = dir.path().join("first.chnk");
    let second = dir.path().join("second.chnk");
    save_model(&first)?;

    let mut archive = ChunkArchive::open_with_temp_store(&first, store()?)?;
    archive.save(&second)?;

    assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);

    Ok(())
}

#[traced_test]
#[test]
fn replaced_buffers_no_longer_need_source() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.chnk");
    save_model(&path)?;

    let mut archive = ChunkArchive::open_with_temp_store(&path, store()?)?;
    let root = archive.root();
    let name = archive
        .find_child(root, *b"NAME")?
        .ok_or(Error::CustomError("NAME missing".into()))?;
    let texture = archive
        .find_child(root, *b"TEXR")?
        .ok_or(Error::CustomError("TEXR missing".into()))?;

    let original = archive.buffer(name)?;
    archive.set_buffer(name, original)?;
    assert_eq!(archive.buffer_location(name)?, BufferLocation::Memory);
    assert_eq!(archive.buffer_location(texture)?, BufferLocation::File);

    archive.close();
    std::fs::remove_file(&path)?;

    assert_eq!(archive.buffer(name)?, b"hover tank".to_vec());
    assert!(matches!(archive.buffer(texture), Err(Error::SourceClosed)));

    Ok(())
}

#[traced_test]
#[test]
fn edit_and_save_over_source() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.chnk");
    save_model(&path)?;

    let mut archive = ChunkArchive::open_with_temp_store(&path, store()?)?;
    let root = archive.root();
    let mesh = archive
        .find_child(root, *b"MESH")?
        .ok_or(Error::CustomError("MESH missing".into()))?;
    let materials = archive
        .find_child(mesh, *b"MTLS")?
        .ok_or(Error::CustomError("MTLS missing".into()))?;

    let offsets_before = archive
        .children(root)?
        .iter()
        .map(|id| archive.node(*id).map(|n| n.offset()))
        .collect::<Result<Vec<_>>>()?;

    // grow a deeply nested buffer, drop one root child and add another
    let steel = archive.children(materials)?[0];
    archive.set_buffer(steel, b"brushed steel".to_vec())?;
    archive.children_mut(root)?.remove(3)?;
    add_buffer(&mut archive, root, *b"NOTE", Alignment::Word, b"edited", "")?;

    let expected = snapshot(&mut archive, root)?;
    let offsets_after = archive
        .children(root)?
        .iter()
        .map(|id| archive.node(*id).map(|n| n.offset()))
        .collect::<Result<Vec<_>>>()?;
    // the child count is unchanged, so the header keeps its size
    assert_eq!(offsets_before[0], offsets_after[0]);

    archive.save(&path)?;
    // the replaced file is still readable through the open handle
    let texture = archive.children(root)?[2];
    assert_eq!(archive.buffer(texture)?, vec![0x7F; 5000]);

    let mut reloaded = ChunkArchive::open_with_temp_store(&path, store()?)?;
    let reloaded_root = reloaded.root();
    assert_eq!(snapshot(&mut reloaded, reloaded_root)?, expected);
    assert_aligned(&reloaded, reloaded_root)?;

    Ok(())
}

#[traced_test]
#[test]
fn open_rejects_other_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("not_an_archive.bin");
    std::fs::write(&path, b"TREE0005 and some more bytes")?;

    assert!(matches!(
        ChunkArchive::open_with_temp_store(&path, store()?),
        Err(Error::InvalidMagic { position: 0 })
    ));

    Ok(())
}
