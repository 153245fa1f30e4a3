use memmap2::Mmap;
use scroll::{Pread, LE};
use std::cell::Cell;
use std::ops::Range;
use std::sync::{Arc, RwLock};

use crate::property::{WzStringMeta, WzStringType};
use crate::util::WzMutableKey;
use crate::WzHeader;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error reading binary: {0}")]
    ReadError(#[from] scroll::Error),
    #[error("error reading utf8 string: {0}")]
    ReadUtf8Error(#[from] std::string::FromUtf8Error),
    #[error("error reading utf16 string: {0}")]
    ReadUtf16Error(#[from] std::string::FromUtf16Error),
}

type Result<T> = std::result::Result<T, Error>;

pub type SharedWzMutableKey = Arc<RwLock<WzMutableKey>>;

/// Subtrahend inside the offset obfuscation.
pub(crate) const WZ_OFFSET_CONSTANT: u32 = 0x581C_3F6D;

/// Owner of an archive's bytes plus the keystream decrypting its strings.
/// Shared (`Arc`) by every lazily loaded node parsed out of it.
#[derive(Debug)]
pub struct WzBaseReader<T: Sized + AsRef<[u8]>> {
    pub map: T,
    pub keys: SharedWzMutableKey,
}

/// The Mmap-backed reader used for whole archives.
pub type WzReader = WzBaseReader<Mmap>;

impl Default for WzBaseReader<Mmap> {
    fn default() -> Self {
        WzBaseReader::from_buff(&[])
    }
}

impl<T: AsRef<[u8]>> WzBaseReader<T> {
    pub fn new(map: T) -> Self {
        WzBaseReader {
            map,
            keys: Arc::new(RwLock::new(WzMutableKey::from_iv([0; 4]))),
        }
    }
    pub fn with_iv(self, iv: [u8; 4]) -> Self {
        WzBaseReader {
            keys: Arc::new(RwLock::new(WzMutableKey::from_iv(iv))),
            ..self
        }
    }
    /// Replace the keystream in place; used by variant auto-detection.
    pub fn swap_iv(&self, iv: [u8; 4]) {
        *self.keys.write().unwrap() = WzMutableKey::from_iv(iv);
    }
    pub fn get_iv(&self) -> [u8; 4] {
        self.keys.read().unwrap().iv
    }

    #[inline]
    pub fn get_size(&self) -> usize {
        self.map.as_ref().len()
    }
    #[inline]
    pub fn get_ref_slice(&self) -> &[u8] {
        self.map.as_ref()
    }
    #[inline]
    pub fn get_slice(&self, range: Range<usize>) -> &[u8] {
        &self.map.as_ref()[range]
    }

    #[inline]
    pub fn try_header(&self) -> Result<WzHeader> {
        self.map.as_ref().pread::<WzHeader>(0).map_err(Error::from)
    }
    #[inline]
    pub fn create_header(&self) -> WzHeader {
        self.try_header().unwrap_or_default()
    }
    #[inline]
    pub fn get_wz_fstart(&self) -> Result<u32> {
        WzHeader::get_wz_fstart(self.map.as_ref()).map_err(Error::from)
    }

    /// Cursor over the whole buffer, carrying the archive header.
    #[inline]
    pub fn create_slice_reader(&self) -> WzSliceReader {
        WzSliceReader::new(self.map.as_ref(), &self.keys).with_header(self.create_header())
    }
    /// Cursor without header context, for bare image payloads.
    #[inline]
    pub fn create_slice_reader_raw(&self) -> WzSliceReader {
        WzSliceReader::new(self.map.as_ref(), &self.keys)
    }

    /// Decrypt `range` against the keystream into an owned buffer.
    pub fn get_decrypt_slice(&self, range: Range<usize>) -> Result<Vec<u8>> {
        decrypt_range(self.map.as_ref(), range, &self.keys)
    }

    /// Decode the string a [`WzStringMeta`] points at.
    pub fn resolve_wz_string_meta(
        &self,
        meta_type: &WzStringType,
        offset: usize,
        length: usize,
    ) -> Result<String> {
        resolve_string_meta(self.map.as_ref(), &self.keys, meta_type, offset, length)
    }
}

impl WzBaseReader<Mmap> {
    /// Copy an owned byte buffer into an anonymous mapping, so buffer- and
    /// file-backed archives share one reader type.
    pub fn from_buff(buff: &[u8]) -> Self {
        let mut memmap = memmap2::MmapMut::map_anon(buff.len().max(1)).unwrap();
        if !buff.is_empty() {
            memmap.copy_from_slice(buff);
        }
        WzBaseReader::new(memmap.make_read_only().unwrap())
    }
}

/// A positioned cursor over (part of) an archive buffer.
#[derive(Debug, Clone)]
pub struct WzSliceReader<'a> {
    pub buf: &'a [u8],
    pub pos: Cell<usize>,
    saved_pos: Cell<usize>,
    pub header: WzHeader<'a>,
    pub keys: SharedWzMutableKey,
}

macro_rules! read_at_current {
    ($func_name:ident, $read_type:ty, $size:expr) => {
        #[inline]
        pub fn $func_name(&self) -> Result<$read_type> {
            let res = self.buf.pread_with::<$read_type>(self.pos.get(), LE)?;
            self.pos.set(self.pos.get() + $size);
            Ok(res)
        }
    };
}

impl<'a> WzSliceReader<'a> {
    pub fn new(buf: &'a [u8], keys: &SharedWzMutableKey) -> Self {
        WzSliceReader {
            buf,
            pos: Cell::new(0),
            saved_pos: Cell::new(0),
            header: Default::default(),
            keys: Arc::clone(keys),
        }
    }
    #[inline]
    pub fn with_header(self, header: WzHeader<'a>) -> Self {
        WzSliceReader { header, ..self }
    }

    #[inline]
    pub fn get_size(&self) -> usize {
        self.buf.len()
    }
    #[inline]
    pub fn is_valid_pos(&self, pos: usize) -> bool {
        pos <= self.get_size()
    }
    #[inline]
    pub fn seek(&self, pos: usize) {
        self.pos.set(pos);
    }
    #[inline]
    pub fn skip(&self, len: usize) {
        self.pos.set(self.pos.get() + len);
    }
    #[inline]
    pub fn save_pos(&self) {
        self.saved_pos.set(self.pos.get());
    }
    #[inline]
    pub fn restore_pos(&self) {
        self.pos.set(self.saved_pos.get());
    }

    read_at_current!(read_u8, u8, 1);
    read_at_current!(read_u16, u16, 2);
    read_at_current!(read_u32, u32, 4);
    read_at_current!(read_u64, u64, 8);
    read_at_current!(read_i8, i8, 1);
    read_at_current!(read_i16, i16, 2);
    read_at_current!(read_i32, i32, 4);
    read_at_current!(read_i64, i64, 8);
    read_at_current!(read_float, f32, 4);
    read_at_current!(read_double, f64, 8);

    #[inline]
    pub fn read_u8_at(&self, pos: usize) -> Result<u8> {
        self.buf.pread_with::<u8>(pos, LE).map_err(Error::from)
    }

    /// Compressed int: one signed byte, or the -128 sentinel plus an i32.
    #[inline]
    pub fn read_wz_int(&self) -> Result<i32> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            return self.read_i32();
        }
        Ok(small as i32)
    }
    /// Compressed long: one signed byte, or the -128 sentinel plus an i64.
    #[inline]
    pub fn read_wz_int64(&self) -> Result<i64> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            return self.read_i64();
        }
        Ok(small as i64)
    }

    /// Encrypted string at the cursor: signed length byte, positive for
    /// UTF-16 units (127 = i32 length follows), negative for 8-bit chars
    /// (-128 = i32 length follows), zero for empty.
    pub fn read_wz_string(&self) -> Result<String> {
        let meta = self.read_wz_string_meta()?;
        self.resolve_wz_string_meta(&meta.string_type, meta.offset, meta.length as usize)
    }
    #[inline]
    pub fn read_wz_string_at_offset(&self, offset: usize) -> Result<String> {
        self.save_pos();
        self.pos.set(offset);
        let string = self.read_wz_string();
        self.restore_pos();
        string
    }

    /// Like [`Self::read_wz_string`] but only records where the string
    /// lives, for lazily decoded values.
    pub fn read_wz_string_meta(&self) -> Result<WzStringMeta> {
        let small = self.read_i8()?;

        match small {
            0 => Ok(WzStringMeta::empty()),
            len if len > 0 => {
                let units = if len == i8::MAX {
                    self.read_i32()? as u32
                } else {
                    len as u32
                };
                let meta = WzStringMeta::new_unicode(self.pos.get(), units * 2);
                self.skip((units * 2) as usize);
                Ok(meta)
            }
            len => {
                let bytes = if len == i8::MIN {
                    self.read_i32()? as u32
                } else {
                    (-(len as i32)) as u32
                };
                let meta = WzStringMeta::new_ascii(self.pos.get(), bytes);
                self.skip(bytes as usize);
                Ok(meta)
            }
        }
    }
    #[inline]
    pub fn read_wz_string_meta_at(&self, offset: usize) -> Result<WzStringMeta> {
        self.save_pos();
        self.pos.set(offset);
        let meta = self.read_wz_string_meta();
        self.restore_pos();
        meta
    }

    /// String-or-offset block: 0x00/0x73 inline, 0x01/0x1B a 4-byte
    /// offset relative to `origin` where the string lives.
    pub fn read_wz_string_block(&self, origin: usize) -> Result<String> {
        match self.read_u8()? {
            0 | 0x73 => self.read_wz_string(),
            1 | 0x1B => {
                let append = self.read_i32()?;
                self.read_wz_string_at_offset(origin + append as usize)
            }
            _ => Ok(String::new()),
        }
    }
    pub fn read_wz_string_block_meta(&self, origin: usize) -> Result<WzStringMeta> {
        match self.read_u8()? {
            0 | 0x73 => self.read_wz_string_meta(),
            1 | 0x1B => {
                let append = self.read_i32()?;
                self.read_wz_string_meta_at(origin + append as usize)
            }
            _ => Ok(WzStringMeta::empty()),
        }
    }

    /// Decrypt and read the obfuscated uint32 offset field at the cursor.
    /// `hash` is the archive's version hash; the result is absolute.
    pub fn read_wz_offset(&self, hash: usize) -> Result<usize> {
        let fstart = self.header.fstart as u32;

        let mut mask = (self.pos.get() as u32).wrapping_sub(fstart) ^ 0xFFFF_FFFF;
        mask = mask.wrapping_mul(hash as u32);
        mask = mask.wrapping_sub(WZ_OFFSET_CONSTANT);
        mask = mask.rotate_left(mask & 0x1F);

        let encrypted = self.read_u32()?;
        let offset = (mask ^ encrypted).wrapping_add(fstart * 2);

        Ok(offset as usize)
    }

    pub fn get_decrypt_slice(&self, range: Range<usize>) -> Result<Vec<u8>> {
        decrypt_range(self.buf, range, &self.keys)
    }
    pub fn resolve_wz_string_meta(
        &self,
        meta_type: &WzStringType,
        offset: usize,
        length: usize,
    ) -> Result<String> {
        resolve_string_meta(self.buf, &self.keys, meta_type, offset, length)
    }
}

fn decrypt_range(buf: &[u8], range: Range<usize>, keys: &SharedWzMutableKey) -> Result<Vec<u8>> {
    let len = range.len();
    let slice = buf.get(range).ok_or(scroll::Error::TooBig {
        size: len,
        len: buf.len(),
    })?;

    let needs_grow = {
        let keys = keys.read().unwrap();
        !keys.is_enough(len)
    };
    if needs_grow {
        keys.write().unwrap().ensure_key_size(len);
    }

    let mut data = slice.to_vec();
    keys.read().unwrap().decrypt_slice(&mut data);

    Ok(data)
}

fn resolve_string_meta(
    buf: &[u8],
    keys: &SharedWzMutableKey,
    meta_type: &WzStringType,
    offset: usize,
    length: usize,
) -> Result<String> {
    match meta_type {
        WzStringType::Empty => Ok(String::new()),
        WzStringType::Unicode => {
            let decrypted = decrypt_range(buf, offset..offset + length, keys)?;
            let units: Vec<u16> = decrypted
                .chunks_exact(2)
                .enumerate()
                .map(|(i, chunk)| {
                    u16::from_le_bytes([chunk[0], chunk[1]]) ^ (i as u16).wrapping_add(0xAAAA)
                })
                .collect();
            Ok(String::from_utf16_lossy(&units))
        }
        WzStringType::Ascii => {
            let mut decrypted = decrypt_range(buf, offset..offset + length, keys)?;
            decrypted
                .iter_mut()
                .enumerate()
                .for_each(|(i, byte)| *byte ^= (i as u8).wrapping_add(0xAA));
            Ok(String::from_utf8_lossy(&decrypted).to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::maple_crypto_constants::WZ_GMSIV;
    use crate::writer::WzWriter;

    fn keys_with_iv(iv: [u8; 4]) -> SharedWzMutableKey {
        Arc::new(RwLock::new(WzMutableKey::from_iv(iv)))
    }

    #[test]
    fn test_primitives() {
        let mut buf = Vec::new();
        buf.push(0x7Fu8);
        buf.extend_from_slice(&(-2i16).to_le_bytes());
        buf.extend_from_slice(&3i32.to_le_bytes());
        buf.extend_from_slice(&4i64.to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        buf.extend_from_slice(&2.25f64.to_le_bytes());

        let keys = keys_with_iv([0; 4]);
        let reader = WzSliceReader::new(&buf, &keys);

        assert_eq!(reader.read_u8().unwrap(), 0x7F);
        assert_eq!(reader.read_i16().unwrap(), -2);
        assert_eq!(reader.read_i32().unwrap(), 3);
        assert_eq!(reader.read_i64().unwrap(), 4);
        assert_eq!(reader.read_float().unwrap(), 1.5);
        assert_eq!(reader.read_double().unwrap(), 2.25);
    }

    #[test]
    fn test_read_past_end_fails() {
        let keys = keys_with_iv([0; 4]);
        let reader = WzSliceReader::new(&[0x01], &keys);

        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn test_wz_int_round_trip() {
        let keys = keys_with_iv([0; 4]);

        for value in [0, 1, -1, 127, -127, 128, -128, 40000, i32::MIN, i32::MAX] {
            let mut writer = WzWriter::new(&keys);
            writer.write_wz_int(value);

            let reader = WzSliceReader::new(&writer.buf, &keys);
            assert_eq!(reader.read_wz_int().unwrap(), value);
            assert_eq!(reader.pos.get(), writer.buf.len());
        }
    }

    #[test]
    fn test_wz_int64_round_trip() {
        let keys = keys_with_iv([0; 4]);

        for value in [0i64, 127, -127, -128, 1 << 40, i64::MIN, i64::MAX] {
            let mut writer = WzWriter::new(&keys);
            writer.write_wz_int64(value);

            let reader = WzSliceReader::new(&writer.buf, &keys);
            assert_eq!(reader.read_wz_int64().unwrap(), value);
        }
    }

    #[test]
    fn test_wz_int_sentinel_bytes() {
        let keys = keys_with_iv([0; 4]);
        let mut writer = WzWriter::new(&keys);
        writer.write_wz_int(-128);

        assert_eq!(writer.buf, [0x80, 0x80, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_wz_string_round_trip() {
        let long_ascii = "x".repeat(200);
        let long_unicode = "寬".repeat(150);

        for iv in [[0u8; 4], WZ_GMSIV] {
            let keys = keys_with_iv(iv);

            for value in [
                "",
                "a",
                "test1",
                "測試文字",
                long_ascii.as_str(),
                long_unicode.as_str(),
            ] {
                let mut writer = WzWriter::new(&keys);
                writer.write_wz_string(value);

                let reader = WzSliceReader::new(&writer.buf, &keys);
                assert_eq!(reader.read_wz_string().unwrap(), value);
                assert_eq!(reader.pos.get(), writer.buf.len());
            }
        }
    }

    #[test]
    fn test_empty_string_is_single_zero_byte() {
        let keys = keys_with_iv(WZ_GMSIV);
        let mut writer = WzWriter::new(&keys);
        writer.write_wz_string("");

        assert_eq!(writer.buf, [0x00]);
    }

    #[test]
    fn test_string_block_inline_and_offset() {
        let keys = keys_with_iv([0; 4]);
        let mut writer = WzWriter::new(&keys);

        // first occurrence inline, second as offset reference
        writer.write_wz_string_block("LongStringOverFourChars", 0x00, 0x01);
        let first_len = writer.buf.len();
        writer.write_wz_string_block("LongStringOverFourChars", 0x00, 0x01);

        assert_eq!(writer.buf.len(), first_len + 5);
        assert_eq!(writer.buf[first_len], 0x01);

        let reader = WzSliceReader::new(&writer.buf, &keys);
        assert_eq!(
            reader.read_wz_string_block(0).unwrap(),
            "LongStringOverFourChars"
        );
        assert_eq!(
            reader.read_wz_string_block(0).unwrap(),
            "LongStringOverFourChars"
        );
    }

    #[test]
    fn test_wz_offset_round_trip() {
        // version hash 0x6B4F2A31, fstart 0x4C, field at 0x100, target 0x2000
        let hash = 0x6B4F2A31usize;
        let fstart = 0x4C;
        let position = 0x100;
        let target = 0x2000;

        let keys = keys_with_iv([0; 4]);
        let mut writer = WzWriter::new(&keys);
        writer.buf.resize(position, 0);
        writer.write_wz_offset(target, hash, fstart);
        writer.buf.resize(0x3000, 0);

        let header = WzHeader {
            fstart,
            ..Default::default()
        };
        let reader = WzSliceReader::new(&writer.buf, &keys).with_header(header);
        reader.seek(position);

        assert_eq!(reader.read_wz_offset(hash).unwrap(), target);
    }
}
