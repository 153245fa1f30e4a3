use hashbrown::HashSet;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::node::is_subtree_modified;
use crate::reader::SharedWzMutableKey;
use crate::util::version::{
    calculate_version_hash, encver_from_hash, get_iv_by_maple_version, WzMapleVersion,
};
use crate::util::write_property::{serialize_image, WzWriteError};
use crate::util::WzMutableKey;
use crate::writer::{wz_checksum, wz_int_size, wz_object_size, WzWriter};
use crate::{NodeParseError, WzNodeArc, WzNodeName, WzObjectType, WzReader};

#[derive(Debug, Error)]
pub enum WzSaveError {
    #[error("tree root is not a File node")]
    NotFileNode,

    #[error("source archive's layout parameters differ, verbatim copy would corrupt offsets")]
    MismatchedLayoutParameters,

    #[error("node {0} cannot appear inside a directory")]
    UnexpectedNode(String),

    #[error(transparent)]
    WriteError(#[from] WzWriteError),

    #[error(transparent)]
    NodeError(#[from] NodeParseError),
}

pub const WZ_COPYRIGHT: &str = "Package file v1.0 Copyright 2002 Wizet, ZMS";
/// 16 fixed header bytes + copyright + terminating NUL.
pub const WZ_FSTART: usize = 16 + WZ_COPYRIGHT.len() + 1;

enum ImageData {
    /// unchanged image, copied bit-exact from the source buffer
    Verbatim {
        reader: Arc<WzReader>,
        offset: usize,
        size: usize,
    },
    Owned(Vec<u8>),
}

struct ImageLayout {
    name: WzNodeName,
    data: ImageData,
    size: usize,
    checksum: i32,
    name_cost: usize,
    offset: usize,
}

struct DirLayout {
    name: WzNodeName,
    images: Vec<ImageLayout>,
    dirs: Vec<DirLayout>,
    block_size: usize,
    name_cost: usize,
    offset: usize,
}

/// Emit a fresh archive from `root` under the given variant and patch
/// version.
///
/// When `original` is supplied, unmodified images are copied verbatim
/// from it; that requires the data-section start and version hash the
/// tree was parsed with to match the ones being written, otherwise the
/// copied blocks' inline offsets would resolve wrong and the call is
/// refused with [`WzSaveError::MismatchedLayoutParameters`]. Without
/// `original` every image is re-serialized from the tree, parsing lazy
/// ones from their own provenance on the way.
pub fn save_archive(
    root: &WzNodeArc,
    version: WzMapleVersion,
    patch_version: i32,
    original: Option<&Arc<WzReader>>,
) -> Result<Vec<u8>, WzSaveError> {
    let iv = get_iv_by_maple_version(version);
    let hash = calculate_version_hash(patch_version);
    let encver = encver_from_hash(hash);

    let fast_path = match original {
        Some(source) => {
            let source_meta = {
                let read = root.read().unwrap();
                match &read.object_type {
                    WzObjectType::File(file) => file.wz_file_meta.clone(),
                    _ => return Err(WzSaveError::NotFileNode),
                }
            };
            if source_meta.hash != hash as usize
                || source.create_header().fstart != WZ_FSTART
                || source.get_iv() != iv
            {
                return Err(WzSaveError::MismatchedLayoutParameters);
            }
            true
        }
        None => {
            if !matches!(root.read().unwrap().object_type, WzObjectType::File(_)) {
                return Err(WzSaveError::NotFileNode);
            }
            false
        }
    };

    let keys: SharedWzMutableKey = Arc::new(RwLock::new(WzMutableKey::from_iv(iv)));

    /* pass 1: every image becomes bytes (or a verbatim slice) */
    let mut layout = collect_dir(root, &keys, fast_path)?;

    /* pass 2: sizes, then offsets for directory blocks and image data */
    let mut interned = HashSet::new();
    compute_name_costs(&mut layout, &mut interned);
    finalize_block_sizes(&mut layout);

    let mut cursor = WZ_FSTART + 2;
    assign_dir_offsets(&mut layout, &mut cursor);
    assign_image_offsets(&mut layout, &mut cursor);

    /* pass 3: emit */
    let mut writer = WzWriter::new(&keys);
    writer.write_bytes(b"PKG1");
    let fsize_pos = writer.pos();
    writer.write_u64(0);
    writer.write_u32(WZ_FSTART as u32);
    writer.write_bytes(WZ_COPYRIGHT.as_bytes());
    writer.write_u8(0);
    while writer.pos() < WZ_FSTART {
        writer.write_u8(0);
    }

    writer.write_u16(encver);

    emit_dir_blocks(&mut writer, &layout, hash as usize);
    emit_image_data(&mut writer, &layout);

    let total = writer.pos();
    writer.patch_u64_at(fsize_pos, (total - WZ_FSTART) as u64);

    Ok(writer.buf)
}

/// Pass 1 over one directory-shaped node: serialize image children,
/// recurse into directory children, keeping each group's child order.
fn collect_dir(
    node: &WzNodeArc,
    keys: &SharedWzMutableKey,
    fast_path: bool,
) -> Result<DirLayout, WzSaveError> {
    let (name, children) = {
        let read = node.read().unwrap();
        (read.name.clone(), read.children.clone())
    };

    let mut images = Vec::new();
    let mut dirs = Vec::new();

    for child in children.iter() {
        let is_image = {
            let read = child.read().unwrap();
            match &read.object_type {
                WzObjectType::Image(_) => true,
                WzObjectType::Directory(_) => false,
                _ => return Err(WzSaveError::UnexpectedNode(read.name.to_string())),
            }
        };

        if is_image {
            images.push(collect_image(child, keys, fast_path)?);
        } else {
            dirs.push(collect_dir(child, keys, fast_path)?);
        }
    }

    Ok(DirLayout {
        name,
        images,
        dirs,
        block_size: 0,
        name_cost: 0,
        offset: 0,
    })
}

fn collect_image(
    node: &WzNodeArc,
    keys: &SharedWzMutableKey,
    fast_path: bool,
) -> Result<ImageLayout, WzSaveError> {
    let unmodified = !is_subtree_modified(node);

    let (name, provenance) = {
        let read = node.read().unwrap();
        let WzObjectType::Image(image) = &read.object_type else {
            return Err(WzSaveError::UnexpectedNode(read.name.to_string()));
        };
        (
            read.name.clone(),
            (image.block_size > 0).then(|| {
                (
                    Arc::clone(&image.reader),
                    image.offset,
                    image.block_size,
                    image.is_parsed,
                )
            }),
        )
    };

    if unmodified && fast_path {
        if let Some((reader, offset, size, _)) = provenance {
            let checksum = wz_checksum(reader.get_slice(offset..offset + size));
            return Ok(ImageLayout {
                name,
                data: ImageData::Verbatim {
                    reader,
                    offset,
                    size,
                },
                size,
                checksum,
                name_cost: 0,
                offset: 0,
            });
        }
    }

    // re-serialize from the tree; lazy images load from their own
    // provenance first
    if let Some((_, _, _, is_parsed)) = provenance {
        let has_children = !node.read().unwrap().children.is_empty();
        if !is_parsed && !has_children {
            node.write().unwrap().parse(node)?;
        }
    }

    let bytes = serialize_image(node, keys)?;
    let size = bytes.len();
    let checksum = wz_checksum(&bytes);

    Ok(ImageLayout {
        name,
        data: ImageData::Owned(bytes),
        size,
        checksum,
        name_cost: 0,
        offset: 0,
    })
}

/// Name byte costs in exact emission order, driving the mirror of the
/// directory-entry interning cache.
fn compute_name_costs(dir: &mut DirLayout, interned: &mut HashSet<(u8, String)>) {
    for image in dir.images.iter_mut() {
        image.name_cost = wz_object_size(4, &image.name, interned);
    }
    for sub in dir.dirs.iter_mut() {
        sub.name_cost = wz_object_size(3, &sub.name, interned);
    }
    for sub in dir.dirs.iter_mut() {
        compute_name_costs(sub, interned);
    }
}

/// Directory-block byte sizes, children first. An empty directory is a
/// single zero byte.
fn finalize_block_sizes(dir: &mut DirLayout) {
    for sub in dir.dirs.iter_mut() {
        finalize_block_sizes(sub);
    }

    let entry_count = dir.images.len() + dir.dirs.len();
    if entry_count == 0 {
        dir.block_size = 1;
        return;
    }

    let mut size = wz_int_size(entry_count as i32);
    for image in dir.images.iter() {
        size += image.name_cost + wz_int_size(image.size as i32) + wz_int_size(image.checksum) + 4;
    }
    for sub in dir.dirs.iter() {
        size += sub.name_cost + wz_int_size(sub.block_size as i32) + wz_int_size(0) + 4;
    }
    dir.block_size = size;
}

fn assign_dir_offsets(dir: &mut DirLayout, cursor: &mut usize) {
    dir.offset = *cursor;
    *cursor += dir.block_size;
    for sub in dir.dirs.iter_mut() {
        assign_dir_offsets(sub, cursor);
    }
}

fn assign_image_offsets(dir: &mut DirLayout, cursor: &mut usize) {
    for image in dir.images.iter_mut() {
        image.offset = *cursor;
        *cursor += image.size;
    }
    for sub in dir.dirs.iter_mut() {
        assign_image_offsets(sub, cursor);
    }
}

fn emit_dir_blocks(writer: &mut WzWriter, dir: &DirLayout, hash: usize) {
    debug_assert_eq!(writer.pos(), dir.offset);

    let entry_count = dir.images.len() + dir.dirs.len();
    if entry_count == 0 {
        writer.write_u8(0);
    } else {
        writer.write_wz_int(entry_count as i32);

        // images before subdirectories; the ordering is observable
        // through checksums and asserted by the round-trip tests
        for image in dir.images.iter() {
            writer.write_wz_object(4, &image.name, WZ_FSTART);
            writer.write_wz_int(image.size as i32);
            writer.write_wz_int(image.checksum);
            writer.write_wz_offset(image.offset, hash, WZ_FSTART);
        }
        for sub in dir.dirs.iter() {
            writer.write_wz_object(3, &sub.name, WZ_FSTART);
            writer.write_wz_int(sub.block_size as i32);
            writer.write_wz_int(0);
            writer.write_wz_offset(sub.offset, hash, WZ_FSTART);
        }
    }

    debug_assert_eq!(writer.pos(), dir.offset + dir.block_size);

    for sub in dir.dirs.iter() {
        emit_dir_blocks(writer, sub, hash);
    }
}

fn emit_image_data(writer: &mut WzWriter, dir: &DirLayout) {
    for image in dir.images.iter() {
        debug_assert_eq!(writer.pos(), image.offset);
        match &image.data {
            ImageData::Verbatim {
                reader,
                offset,
                size,
            } => writer.write_bytes(reader.get_slice(*offset..*offset + *size)),
            ImageData::Owned(bytes) => writer.write_bytes(bytes),
        }
    }
    for sub in dir.dirs.iter() {
        emit_image_data(writer, sub);
    }
}
