use hashbrown::HashMap;
use std::sync::Arc;

use crate::property::WzStringType;
use crate::reader::{SharedWzMutableKey, WZ_OFFSET_CONSTANT};

/// Growable output buffer with the write-side duals of every WZ read
/// primitive, plus the two string-interning caches of the archive format:
/// one for property names/values (per image), one for directory-entry
/// names (per archive, offsets relative to the data-section start).
#[derive(Debug)]
pub struct WzWriter {
    pub buf: Vec<u8>,
    pub keys: SharedWzMutableKey,
    string_cache: HashMap<String, u32>,
    object_cache: HashMap<(u8, String), u32>,
}

impl WzWriter {
    pub fn new(keys: &SharedWzMutableKey) -> Self {
        WzWriter {
            buf: Vec::new(),
            keys: Arc::clone(keys),
            string_cache: HashMap::new(),
            object_cache: HashMap::new(),
        }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    #[inline]
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[inline]
    pub fn patch_u32_at(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn patch_u64_at(&mut self, pos: usize, v: u64) {
        self.buf[pos..pos + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Compressed int: one signed byte for |v| < 128, otherwise the -128
    /// sentinel plus a full i32.
    pub fn write_wz_int(&mut self, v: i32) {
        if (-127..=127).contains(&v) {
            self.write_i8(v as i8);
        } else {
            self.write_i8(i8::MIN);
            self.write_i32(v);
        }
    }
    /// Compressed long, same sentinel with an i64 follower.
    pub fn write_wz_int64(&mut self, v: i64) {
        if (-127..=127).contains(&v) {
            self.write_i8(v as i8);
        } else {
            self.write_i8(i8::MIN);
            self.write_i64(v);
        }
    }

    /// Encrypted string: the 8-bit branch when every char is ASCII,
    /// UTF-16 units otherwise. The reader recovers the same branch from
    /// the length byte's sign.
    pub fn write_wz_string(&mut self, s: &str) {
        let encoded = encrypt_str(&self.keys, s, &wz_string_type_for(s));
        self.buf.extend_from_slice(&encoded);
    }

    /// String-or-offset block: emit `without_offset` + inline string on
    /// first sight, `with_offset` + a 4-byte reference on repeats.
    /// Only strings longer than 4 chars are interned.
    pub fn write_wz_string_block(&mut self, s: &str, without_offset: u8, with_offset: u8) {
        if s.len() > 4 {
            if let Some(&offset) = self.string_cache.get(s) {
                self.write_u8(with_offset);
                self.write_i32(offset as i32);
                return;
            }
        }

        self.write_u8(without_offset);
        let s_offset = self.buf.len() as u32;
        self.write_wz_string(s);

        if s.len() > 4 {
            self.string_cache.insert(s.to_string(), s_offset);
        }
    }

    /// Directory-entry name: discriminator 3 (dir) or 4 (image) + inline
    /// string on first sight, discriminator 2 + an offset relative to
    /// `fstart` on repeats. Keyed by (discriminator, name) so a dir and
    /// an image sharing a name don't alias.
    pub fn write_wz_object(&mut self, discriminator: u8, name: &str, fstart: usize) {
        if name.len() > 4 {
            if let Some(&offset) = self.object_cache.get(&(discriminator, name.to_string())) {
                self.write_u8(2);
                self.write_i32(offset as i32);
                return;
            }
        }

        let rel_offset = (self.buf.len() - fstart) as u32;
        self.write_u8(discriminator);
        self.write_wz_string(name);

        if name.len() > 4 {
            self.object_cache
                .insert((discriminator, name.to_string()), rel_offset);
        }
    }

    /// Obfuscated uint32 offset field: the inverse of the reader's
    /// transformation, applied at the current position.
    pub fn write_wz_offset(&mut self, target: usize, hash: usize, fstart: usize) {
        let mut mask = (self.buf.len() as u32).wrapping_sub(fstart as u32) ^ 0xFFFF_FFFF;
        mask = mask.wrapping_mul(hash as u32);
        mask = mask.wrapping_sub(WZ_OFFSET_CONSTANT);
        mask = mask.rotate_left(mask & 0x1F);

        let stored = mask ^ (target as u32).wrapping_sub((fstart as u32).wrapping_mul(2));
        self.write_u32(stored);
    }
}

pub fn wz_string_type_for(s: &str) -> WzStringType {
    if s.is_empty() {
        WzStringType::Empty
    } else if s.chars().all(|c| c.is_ascii()) {
        WzStringType::Ascii
    } else {
        WzStringType::Unicode
    }
}

/// Encode `s` to its on-disk form, length prefix included.
pub fn encrypt_str(keys: &SharedWzMutableKey, s: &str, string_type: &WzStringType) -> Vec<u8> {
    match string_type {
        WzStringType::Empty => vec![0],
        WzStringType::Ascii => {
            let mut out = Vec::with_capacity(s.len() + 5);
            if s.len() > 127 {
                out.extend_from_slice(&i8::MIN.to_le_bytes());
                out.extend_from_slice(&(s.len() as i32).to_le_bytes());
            } else {
                out.extend_from_slice(&(-(s.len() as i8)).to_le_bytes());
            }

            let mut keys = keys.write().unwrap();
            keys.ensure_key_size(s.len());
            for (i, c) in s.bytes().enumerate() {
                out.push(c ^ (i as u8).wrapping_add(0xAA) ^ keys.at(i));
            }
            out
        }
        WzStringType::Unicode => {
            let units: Vec<u16> = s.encode_utf16().collect();

            let mut out = Vec::with_capacity(units.len() * 2 + 5);
            if units.len() >= 127 {
                out.push(i8::MAX as u8);
                out.extend_from_slice(&(units.len() as i32).to_le_bytes());
            } else {
                out.push(units.len() as u8);
            }

            let mut keys = keys.write().unwrap();
            keys.ensure_key_size(units.len() * 2);
            for (i, unit) in units.iter().enumerate() {
                let key = keys.at(i * 2) as u16 | (keys.at(i * 2 + 1) as u16) << 8;
                let masked = unit ^ (i as u16).wrapping_add(0xAAAA) ^ key;
                out.extend_from_slice(&masked.to_le_bytes());
            }
            out
        }
    }
}

/// Image checksum: byte sum modulo 2^31.
pub fn wz_checksum(bytes: &[u8]) -> i32 {
    (bytes.iter().map(|b| *b as u64).sum::<u64>() & 0x7FFF_FFFF) as i32
}

/// Encoded size of a compressed int, for the layout pass.
pub fn wz_int_size(v: i32) -> usize {
    if (-127..=127).contains(&v) {
        1
    } else {
        5
    }
}
pub fn wz_int64_size(v: i64) -> usize {
    if (-127..=127).contains(&v) {
        1
    } else {
        9
    }
}

/// Encoded size of an encrypted string, length prefix included.
pub fn wz_string_size(s: &str) -> usize {
    match wz_string_type_for(s) {
        WzStringType::Empty => 1,
        WzStringType::Ascii => {
            let prefix = if s.len() > 127 { 5 } else { 1 };
            prefix + s.len()
        }
        WzStringType::Unicode => {
            let units = s.encode_utf16().count();
            let prefix = if units >= 127 { 5 } else { 1 };
            prefix + units * 2
        }
    }
}

/// Size mirror of [`WzWriter::write_wz_object`]: same interning decisions,
/// no bytes. The `seen` set must be driven in emission order.
pub fn wz_object_size(
    discriminator: u8,
    name: &str,
    seen: &mut hashbrown::HashSet<(u8, String)>,
) -> usize {
    if name.len() > 4 {
        if seen.contains(&(discriminator, name.to_string())) {
            return 5;
        }
        seen.insert((discriminator, name.to_string()));
    }
    1 + wz_string_size(name)
}
