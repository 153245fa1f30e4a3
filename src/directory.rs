use std::sync::Arc;

use crate::{
    reader, WzImage, WzNode, WzNodeArc, WzNodeArcVec, WzNodeName, WzReader, WzSliceReader,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown directory entry type {0}, at position {1}")]
    UnknownWzDirectoryType(u8, usize),

    #[error("entry count out of range, wrong version hash or corrupt directory")]
    InvalidEntryCount,

    #[error("entry points outside the archive, wrong version hash")]
    InvalidWzVersion,

    #[error("binary reading error: {0}")]
    ReaderError(#[from] reader::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum WzDirectoryType {
    /// placeholder entry, consumes its bytes and produces no node
    #[default]
    UnknownType = 1,
    /// the type byte and name live at an offset inside the data section
    MetaAtOffset = 2,
    WzDirectory = 3,
    WzImage = 4,
}

impl WzDirectoryType {
    fn from_u8(value: u8, pos: usize) -> Result<Self, Error> {
        match value {
            1 => Ok(WzDirectoryType::UnknownType),
            2 => Ok(WzDirectoryType::MetaAtOffset),
            3 => Ok(WzDirectoryType::WzDirectory),
            4 => Ok(WzDirectoryType::WzImage),
            other => Err(Error::UnknownWzDirectoryType(other, pos)),
        }
    }
}

/// A subdirectory inside an archive. Children resolve on demand from the
/// shared reader.
#[derive(Debug, Clone, Default)]
pub struct WzDirectory {
    pub reader: Arc<WzReader>,
    pub offset: usize,
    pub block_size: usize,
    pub hash: usize,
    pub is_parsed: bool,
}

impl WzDirectory {
    pub fn new(offset: usize, block_size: usize, reader: &Arc<WzReader>) -> Self {
        Self {
            reader: Arc::clone(reader),
            offset,
            block_size,
            hash: 0,
            is_parsed: false,
        }
    }
    pub fn with_hash(mut self, hash: usize) -> Self {
        self.hash = hash;
        self
    }

    pub fn resolve_children(&self, parent: &WzNodeArc) -> Result<WzNodeArcVec, Error> {
        let reader = self.reader.create_slice_reader();

        reader.seek(self.offset);

        let entry_count = reader.read_wz_int()?;
        if !(0..=1_000_000).contains(&entry_count) {
            return Err(Error::InvalidEntryCount);
        }

        let mut nodes: WzNodeArcVec = Vec::with_capacity(entry_count as usize);

        for _ in 0..entry_count {
            let Some(entry) = WzDirectoryEntry::read(&reader, self.hash)? else {
                continue;
            };

            if !reader.is_valid_pos(entry.offset + entry.size) {
                return Err(Error::InvalidWzVersion);
            }

            nodes.push(entry.into_wz_node(parent, self));
        }

        // subdirectory headers are cheap, resolve them right away so the
        // tree shape is visible without touching any image
        for node in nodes.iter() {
            let mut write = node.write().unwrap();
            if let crate::WzObjectType::Directory(dir) = &mut write.object_type {
                let children = dir.resolve_children(node)?;
                dir.is_parsed = true;
                write.children = children;
            }
        }

        Ok(nodes)
    }

}

#[derive(Debug, Default)]
pub(crate) struct WzDirectoryEntry {
    pub name: WzNodeName,
    pub dir_type: WzDirectoryType,
    pub size: usize,
    pub offset: usize,
    pub checksum: i32,
}

impl WzDirectoryEntry {
    /// Read one entry at the cursor. `None` for the type-1 placeholder,
    /// which consumes its bytes without producing a node.
    pub fn read(reader: &WzSliceReader, hash: usize) -> Result<Option<Self>, Error> {
        let mut entry = WzDirectoryEntry {
            dir_type: WzDirectoryType::from_u8(reader.read_u8()?, reader.pos.get())?,
            ..Default::default()
        };

        match entry.dir_type {
            WzDirectoryType::UnknownType => {
                /* 4 unknown bytes, 2 unknown bytes, one offset field */
                reader.skip(4 + 2);
                reader.read_u32()?;
                return Ok(None);
            }
            WzDirectoryType::MetaAtOffset => {
                let str_offset = reader.read_i32()?;
                let meta_at = reader.header.fstart + str_offset as usize;

                entry.dir_type =
                    WzDirectoryType::from_u8(reader.read_u8_at(meta_at)?, meta_at)?;
                entry.name = reader.read_wz_string_at_offset(meta_at + 1)?.into();
            }
            WzDirectoryType::WzDirectory | WzDirectoryType::WzImage => {
                entry.name = reader.read_wz_string()?.into();
            }
        }

        entry.size = reader.read_wz_int()? as usize;
        entry.checksum = reader.read_wz_int()?;
        entry.offset = reader.read_wz_offset(hash)?;

        Ok(Some(entry))
    }

    pub fn into_wz_node(self, parent: &WzNodeArc, owner: &WzDirectory) -> WzNodeArc {
        let node = match self.dir_type {
            WzDirectoryType::WzDirectory => {
                let sub_dir = WzDirectory::new(self.offset, self.size, &owner.reader)
                    .with_hash(owner.hash);
                WzNode::new(&self.name, sub_dir, Some(parent))
            }
            _ => {
                let image = WzImage::new(&self.name, self.offset, self.size, &owner.reader);
                WzNode::new(&self.name, image, Some(parent))
            }
        };

        node.into_lock()
    }
}
