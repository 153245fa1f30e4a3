pub mod directory;
pub mod file;
mod header;
pub mod node;
mod node_cast;
mod node_name;
mod object;
pub mod property;
pub mod reader;
pub mod util;
pub mod writer;
pub mod wz_image;

pub use directory::{Error as WzDirectoryParseError, WzDirectory};
pub use file::{Error as WzFileParseError, WzFile, WzFileMeta};
pub use header::*;
pub use node::{
    add_child, is_subtree_modified, remove_child, rename_node, resolve_childs_parent,
    NodeParseError, WzNode, WzNodeArc, WzNodeArcVec,
};
pub use node_cast::*;
pub use node_name::*;
pub use object::*;
pub use reader::{SharedWzMutableKey, WzBaseReader, WzReader, WzSliceReader};
pub use util::version::WzMapleVersion;
pub use util::xml::serialize_xml;
pub use wz_image::{
    WzImage, WzImageParseError, WZ_IMAGE_HEADER_BYTE_WITHOUT_OFFSET,
    WZ_IMAGE_HEADER_BYTE_WITH_OFFSET,
};

use property::{WzPngParseError, WzSoundError};
use std::sync::Arc;
use util::repack::WzSaveError;

/// Parse a whole archive from memory. Directory and image entries come
/// back populated; each image's property tree stays deferred until
/// [`parse_image`]. Variant and patch version are detected by trial when
/// not supplied.
pub fn parse_archive(
    bytes: &[u8],
    version: Option<WzMapleVersion>,
    patch_version: Option<i32>,
) -> Result<WzNodeArc, NodeParseError> {
    let file = WzFile::from_buff(bytes, version, patch_version)
        .map_err(NodeParseError::WzFileParseError)?;

    let node = WzNode::from_str("", file, None).into_lock();
    node.write().unwrap().parse(&node)?;

    Ok(node)
}

/// Populate the property tree under an image node from its recorded
/// slice. Idempotent.
pub fn parse_image(node: &WzNodeArc) -> Result<(), NodeParseError> {
    util::parse_node(node)
}

/// Decompress and unpack a canvas node into RGBA8888 pixels.
pub fn decode_canvas(node: &WzNodeArc) -> Result<Vec<u8>, WzPngParseError> {
    node.read()
        .unwrap()
        .try_as_png()
        .ok_or(WzPngParseError::NotPngProperty)?
        .extract_rgba()
}

/// RGBA8888 → PNG bytes.
pub use property::png::encode_png as encode_canvas_png;

/// The opaque audio body of a sound node plus its MIME guess.
pub fn extract_sound(node: &WzNodeArc) -> Result<(Vec<u8>, &'static str), WzSoundError> {
    node.read()
        .unwrap()
        .try_as_sound()
        .ok_or(WzSoundError::NotSoundProperty)
        .map(|sound| sound.extract())
}

/// Emit a fresh archive from the tree. The verbatim fast path for
/// unchanged images switches on automatically when the requested layout
/// matches the one the tree was parsed with; see
/// [`util::repack::save_archive`] for explicit control.
pub fn repack_archive(
    root: &WzNodeArc,
    version: WzMapleVersion,
    patch_version: i32,
) -> Result<Vec<u8>, WzSaveError> {
    let original = {
        let read = root.read().unwrap();
        match &read.object_type {
            WzObjectType::File(file)
                if file.wz_file_meta.hash
                    == util::version::calculate_version_hash(patch_version) as usize
                    && file.reader.create_header().fstart == util::repack::WZ_FSTART
                    && file.reader.get_iv()
                        == util::version::get_iv_by_maple_version(version) =>
            {
                Some(Arc::clone(&file.reader))
            }
            _ => None,
        }
    };

    util::repack::save_archive(root, version, patch_version, original.as_ref())
}
