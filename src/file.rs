use memmap2::Mmap;
use std::fs::File;
use std::sync::Arc;
use tracing::debug;

use crate::util::version::{
    check_and_get_version_hash, get_iv_by_maple_version, version_candidates, WzMapleVersion,
    GUESS_VERSIONS, WZ_VERSION_HEADER_64BIT_START,
};
use crate::wz_image::is_valid_wz_image;
use crate::{
    directory, reader, WzDirectory, WzNodeArc, WzNodeArcVec, WzObjectType, WzReader, WzSliceReader,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileError(#[from] std::io::Error),

    #[error("malformed wz header")]
    MalformedHeader,

    #[error("input ends inside the fixed header")]
    TruncatedInput,

    #[error("no known regional variant decrypts this archive")]
    UnsupportedVariant,

    #[error("unable to determine the patch version")]
    VersionDetectionFailed,

    #[error("binary reading error: {0}")]
    ReaderError(#[from] reader::Error),

    #[error(transparent)]
    DirectoryError(#[from] directory::Error),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct WzFileMeta {
    /// path of the wz file, empty for buffer-backed archives
    pub path: String,
    /// game patch version; -1 until detected
    pub patch_version: i32,
    /// the stored version header (a.k.a. encver)
    pub wz_version_header: i32,
    /// classic archives carry the version header, 64-bit ones don't
    pub wz_with_encrypt_version_header: bool,
    /// the hash feeding the offset obfuscation
    pub hash: usize,
    /// regional variant; `None` until detected
    pub maple_version: Option<WzMapleVersion>,
}

/// The root of one archive: the shared reader plus everything detection
/// learned about it.
#[derive(Debug, Clone, Default)]
pub struct WzFile {
    pub reader: Arc<WzReader>,
    /// where the root directory block starts
    pub offset: usize,
    pub block_size: usize,
    pub is_parsed: bool,
    pub wz_file_meta: WzFileMeta,
}

impl WzFile {
    pub fn from_file<P>(
        path: P,
        version: Option<WzMapleVersion>,
        patch_version: Option<i32>,
    ) -> Result<WzFile, Error>
    where
        P: AsRef<std::path::Path>,
    {
        let file = File::open(&path)?;
        let map = unsafe { Mmap::map(&file)? };
        let path = path.as_ref().to_str().unwrap_or_default().to_string();

        Self::from_reader(WzReader::new(map), path, version, patch_version)
    }

    /// An archive already sitting in memory, the browser/worker path.
    pub fn from_buff(
        buff: &[u8],
        version: Option<WzMapleVersion>,
        patch_version: Option<i32>,
    ) -> Result<WzFile, Error> {
        Self::from_reader(WzReader::from_buff(buff), String::new(), version, patch_version)
    }

    fn from_reader(
        reader: WzReader,
        path: String,
        version: Option<WzMapleVersion>,
        patch_version: Option<i32>,
    ) -> Result<WzFile, Error> {
        let header = reader.try_header().map_err(|_| Error::TruncatedInput)?;
        if !header.is_valid() {
            return Err(Error::MalformedHeader);
        }
        if header.fstart + 2 > reader.get_size() {
            return Err(Error::TruncatedInput);
        }

        if let Some(version) = version {
            reader.swap_iv(get_iv_by_maple_version(version));
        }

        let block_size = reader.get_size();

        Ok(WzFile {
            offset: header.fstart + 2,
            block_size,
            is_parsed: false,
            reader: Arc::new(reader),
            wz_file_meta: WzFileMeta {
                path,
                patch_version: patch_version.unwrap_or(-1),
                wz_version_header: 0,
                wz_with_encrypt_version_header: true,
                hash: 0,
                maple_version: version,
            },
        })
    }

    /// Resolve the root directory, detecting the regional variant and
    /// patch version by trial where they weren't supplied.
    pub fn parse(
        &mut self,
        parent: &WzNodeArc,
        patch_version: Option<i32>,
    ) -> Result<WzNodeArcVec, Error> {
        let slice_reader = self.reader.create_slice_reader();

        let (with_version_header, encver) = check_64bit_client(&slice_reader);

        let version_header = if with_version_header {
            encver as i32
        } else {
            WZ_VERSION_HEADER_64BIT_START as i32
        };
        self.offset = slice_reader.header.fstart + if with_version_header { 2 } else { 0 };

        let patch_hint = patch_version.or_else(|| {
            (self.wz_file_meta.patch_version >= 0).then_some(self.wz_file_meta.patch_version)
        });

        let variants: Vec<WzMapleVersion> = match self.wz_file_meta.maple_version {
            Some(version) => vec![version],
            None => GUESS_VERSIONS.to_vec(),
        };
        let variant_hinted = self.wz_file_meta.maple_version.is_some();

        for variant in variants {
            self.reader.swap_iv(get_iv_by_maple_version(variant));

            let candidates: Box<dyn Iterator<Item = i32>> = match patch_hint {
                Some(patch) => Box::new(std::iter::once(patch)),
                None => version_candidates(!with_version_header),
            };

            for candidate in candidates {
                let hash = check_and_get_version_hash(version_header, candidate);
                if hash == 0 {
                    continue;
                }

                match self.try_resolve_with_hash(parent, hash as usize) {
                    Ok(childs) => {
                        debug!(variant = ?variant, patch = candidate, "archive layout detected");
                        self.wz_file_meta = WzFileMeta {
                            path: std::mem::take(&mut self.wz_file_meta.path),
                            patch_version: candidate,
                            wz_version_header: version_header,
                            wz_with_encrypt_version_header: with_version_header,
                            hash: hash as usize,
                            maple_version: Some(variant),
                        };
                        self.is_parsed = true;
                        return Ok(childs);
                    }
                    Err(_) => continue,
                }
            }
        }

        if variant_hinted || patch_hint.is_some() {
            Err(Error::VersionDetectionFailed)
        } else {
            Err(Error::UnsupportedVariant)
        }
    }

    /// One detection attempt: walk the directory tree under `hash`, then
    /// sanity-check decoded names and the first image's header byte.
    fn try_resolve_with_hash(
        &self,
        parent: &WzNodeArc,
        hash: usize,
    ) -> Result<WzNodeArcVec, Error> {
        let dir = WzDirectory::new(self.offset, self.block_size, &self.reader).with_hash(hash);

        let childs = dir.resolve_children(parent)?;

        for child in childs.iter() {
            if !subtree_names_decodable(child) {
                return Err(Error::VersionDetectionFailed);
            }
        }

        if let Some(image_offset) = first_image_offset(&childs) {
            let check_byte = self
                .reader
                .create_slice_reader_raw()
                .read_u8_at(image_offset)
                .map_err(|_| Error::VersionDetectionFailed)?;

            if !is_valid_wz_image(check_byte) {
                return Err(Error::VersionDetectionFailed);
            }
        }

        Ok(childs)
    }
}

/// Distinguish classic archives (uint16 version header at fstart) from
/// the 64-bit layout that drops it.
fn check_64bit_client(reader: &WzSliceReader) -> (bool, u16) {
    if reader.header.fsize < 2 {
        return (false, 0);
    }

    reader.seek(reader.header.fstart);

    let Ok(encrypt_version) = reader.read_u16() else {
        return (false, 0);
    };

    if encrypt_version > 0xFF {
        return (false, 0);
    }
    if encrypt_version == 0x80 {
        // could be the first compressed-int of a headerless directory
        if let Ok(prop_count) = reader.read_i32() {
            if prop_count > 0 && (prop_count & 0xFF) == 0 && prop_count <= 0xFFFF {
                return (false, 0);
            }
        }
    }

    (true, encrypt_version)
}

/// At least half of a decoded name must be printable ASCII; anything
/// else means the keystream or hash is wrong.
fn name_mostly_printable(name: &str) -> bool {
    let total = name.chars().count();
    if total == 0 {
        return true;
    }
    let printable = name.chars().filter(|c| (' '..='~').contains(c)).count();
    printable * 2 >= total
}

fn subtree_names_decodable(node: &WzNodeArc) -> bool {
    let read = node.read().unwrap();
    !read.name.contains('\u{FFFD}')
        && name_mostly_printable(&read.name)
        && read.children.iter().all(subtree_names_decodable)
}

fn first_image_offset(childs: &[WzNodeArc]) -> Option<usize> {
    for child in childs {
        let read = child.read().unwrap();
        match &read.object_type {
            WzObjectType::Image(image) => return Some(image.offset),
            WzObjectType::Directory(_) => {
                if let Some(offset) = first_image_offset(&read.children) {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}
