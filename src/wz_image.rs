use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::{util, WzNodeArc, WzNodeArcVec, WzNodeName, WzReader};

#[derive(Debug, Error)]
pub enum WzImageParseError {
    #[error(transparent)]
    FileError(#[from] std::io::Error),

    #[error("parse as wz image failed, pos at {0}")]
    ParseError(usize),

    #[error("unknown wz image header {0}, at offset {1}")]
    UnknownImageHeader(u8, usize),

    #[error(transparent)]
    ParsePropertyListError(#[from] util::WzPropertyParseError),

    #[error("binary reading error: {0}")]
    ReaderError(#[from] crate::reader::Error),

    #[error("not an Image object")]
    NotImageObject,
}

pub const WZ_IMAGE_HEADER_BYTE_WITHOUT_OFFSET: u8 = 0x73;
pub const WZ_IMAGE_HEADER_BYTE_WITH_OFFSET: u8 = 0x1B;
/// Lua-flavored images start with this byte; they are reported and skipped.
pub const WZ_IMAGE_HEADER_BYTE_LUA: u8 = 0x01;

pub fn is_valid_wz_image(check_byte: u8) -> bool {
    check_byte == WZ_IMAGE_HEADER_BYTE_WITH_OFFSET
        || check_byte == WZ_IMAGE_HEADER_BYTE_WITHOUT_OFFSET
}

/// A leaf archive entry holding a property tree, parsed from its recorded
/// slice only when first demanded.
#[derive(Debug, Clone, Default)]
pub struct WzImage {
    pub reader: Arc<WzReader>,
    pub name: WzNodeName,
    /// where the image block starts in the source buffer
    pub offset: usize,
    /// byte length of the image block
    pub block_size: usize,
    pub is_parsed: bool,
}

impl WzImage {
    pub fn new(name: &WzNodeName, offset: usize, block_size: usize, reader: &Arc<WzReader>) -> Self {
        Self {
            reader: Arc::clone(reader),
            name: name.clone(),
            offset,
            block_size,
            is_parsed: false,
        }
    }

    /// Load a bare `.img` file; the IV is guessed from the image header
    /// when not supplied.
    pub fn from_file<P>(path: P, wz_iv: Option<[u8; 4]>) -> Result<Self, WzImageParseError>
    where
        P: AsRef<std::path::Path>,
    {
        let name = path
            .as_ref()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let file = std::fs::File::open(&path)?;
        let map = unsafe { memmap2::Mmap::map(&file)? };

        let iv = wz_iv
            .or_else(|| util::version::guess_iv_from_wz_img(&map))
            .unwrap_or_default();

        let block_size = map.len();
        let reader = WzReader::new(map).with_iv(iv);

        Ok(WzImage {
            reader: Arc::new(reader),
            name: name.into(),
            offset: 0,
            block_size,
            is_parsed: false,
        })
    }

    /// Parse the property list under this image. The outer node tracks
    /// `is_parsed`, so repeated calls are no-ops.
    pub fn resolve_children(&self, parent: &WzNodeArc) -> Result<WzNodeArcVec, WzImageParseError> {
        let reader = self.reader.create_slice_reader_raw();

        reader.seek(self.offset);

        let header_byte = reader.read_u8()?;

        match header_byte {
            WZ_IMAGE_HEADER_BYTE_LUA => {
                warn!(name = %self.name, "lua image skipped");
                return Ok(Vec::new());
            }
            WZ_IMAGE_HEADER_BYTE_WITHOUT_OFFSET | WZ_IMAGE_HEADER_BYTE_WITH_OFFSET => {
                reader.seek(self.offset);
                let name = reader.read_wz_string_block(self.offset)?;
                let reserved = reader.read_u16()?;
                if name != "Property" || reserved != 0 {
                    return Err(WzImageParseError::ParseError(reader.pos.get()));
                }
            }
            _ => {
                return Err(WzImageParseError::UnknownImageHeader(
                    header_byte,
                    self.offset,
                ));
            }
        }

        util::parse_property_list(Some(parent), &self.reader, &reader, self.offset)
            .map_err(WzImageParseError::from)
    }

    /// Fetch a single node by path without materializing the whole image.
    pub fn at_path(&self, path: &str) -> Result<WzNodeArc, WzImageParseError> {
        let reader = self.reader.create_slice_reader_raw();

        reader.seek(self.offset);

        let header_byte = reader.read_u8()?;
        if !is_valid_wz_image(header_byte) {
            return Err(WzImageParseError::UnknownImageHeader(
                header_byte,
                self.offset,
            ));
        }

        reader.seek(self.offset);
        let name = reader.read_wz_string_block(self.offset)?;
        let reserved = reader.read_u16()?;
        if name != "Property" || reserved != 0 {
            return Err(WzImageParseError::ParseError(reader.pos.get()));
        }

        util::get_node(path, &self.reader, &reader, self.offset)
            .map_err(WzImageParseError::from)
    }
}
