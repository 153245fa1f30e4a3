use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};
use std::borrow::Cow;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::WzReader;

#[derive(Debug, Error)]
pub enum WzPngParseError {
    #[error("inflate raw data failed: {0}")]
    InflateError(#[from] flate2::DecompressError),

    #[error("unknown pixel format: {0}")]
    UnknownFormat(u32),

    #[error("canvas payload missing")]
    PayloadMissing,

    #[error(transparent)]
    SaveError(#[from] ImageError),

    #[error("recompress failed: {0}")]
    CompressError(#[from] std::io::Error),

    #[error("not a PNG property")]
    NotPngProperty,
}

/// A canvas pixel payload: dimensions, packed format id, and the
/// zlib-compressed blob, referenced from the source buffer when parsed
/// and owned when the canvas was created or replaced in the editor.
#[derive(Debug, Clone, Default)]
pub struct WzPng {
    pub width: u32,
    pub height: u32,
    /// low byte of the format id
    pub format1: u32,
    /// high byte of the format id
    pub format2: u32,
    reader: Option<Arc<WzReader>>,
    offset: usize,
    length: usize,
    compressed: Option<Vec<u8>>,
}

impl WzPng {
    pub fn new(
        reader: &Arc<WzReader>,
        size: (u32, u32),
        format: (u32, u32),
        slice: (usize, usize),
    ) -> WzPng {
        WzPng {
            width: size.0,
            height: size.1,
            format1: format.0,
            format2: format.1,
            reader: Some(Arc::clone(reader)),
            offset: slice.0,
            length: slice.1,
            compressed: None,
        }
    }

    /// A canvas born in the editor: RGBA pixels recompressed as BGRA8888.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<WzPng, WzPngParseError> {
        let mut bgra = rgba.to_vec();
        for chunk in bgra.chunks_exact_mut(4) {
            chunk.swap(0, 2);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bgra)?;
        let blob = encoder.finish()?;

        Ok(WzPng {
            width,
            height,
            format1: 2,
            format2: 0,
            reader: None,
            offset: 0,
            length: blob.len(),
            compressed: Some(blob),
        })
    }

    /// The combined pixel-format id.
    pub fn format(&self) -> u32 {
        self.format1 | (self.format2 << 8)
    }

    /// The zlib-framed payload, for decoding or verbatim re-emit.
    pub fn compressed_blob(&self) -> Option<Cow<[u8]>> {
        if let Some(blob) = &self.compressed {
            return Some(Cow::Borrowed(blob));
        }
        self.reader
            .as_ref()
            .map(|reader| Cow::Borrowed(reader.get_slice(self.offset..self.offset + self.length)))
    }

    /// Replace the payload with an explicit compressed blob.
    pub fn set_compressed(&mut self, blob: Vec<u8>) {
        self.length = blob.len();
        self.compressed = Some(blob);
    }

    /// Inflated byte count the payload should yield for this format.
    pub fn expected_len(&self) -> Result<usize, WzPngParseError> {
        let area = (self.width * self.height) as usize;
        match self.format() {
            1 | 257 | 513 => Ok(area * 2),
            2 | 3 | 1026 => Ok(area * 4),
            2050 => Ok(area),
            517 => Ok(area.div_ceil(128)),
            other => Err(WzPngParseError::UnknownFormat(other)),
        }
    }

    /// Decompress and unpack the payload into RGBA8888, 4·W·H bytes.
    /// Missing pixels (truncated payloads) come out transparent.
    pub fn extract_rgba(&self) -> Result<Vec<u8>, WzPngParseError> {
        let blob = self.compressed_blob().ok_or(WzPngParseError::PayloadMissing)?;

        let (expected, format) = match self.expected_len() {
            Ok(len) => (len, self.format()),
            Err(WzPngParseError::UnknownFormat(other)) => {
                warn!(format = other, "unknown pixel format, decoding as BGRA8888");
                ((self.width * self.height * 4) as usize, 2)
            }
            Err(e) => return Err(e),
        };

        let raw = inflate(&blob, expected)?;

        let pixels = match format {
            1 => unpack_bgra4444(&raw, self.width, self.height),
            2 => unpack_bgra8888(&raw, self.width, self.height),
            3 | 1026 => unpack_dxt3(&raw, self.width, self.height),
            257 => unpack_argb1555(&raw, self.width, self.height),
            513 => unpack_rgb565(&raw, self.width, self.height),
            517 => {
                let expanded = expand_rgb565_blocks(&raw, self.width, self.height);
                unpack_rgb565(&expanded, self.width, self.height)
            }
            2050 => unpack_dxt5(&raw, self.width, self.height),
            _ => unreachable!("unknown formats already mapped to BGRA8888"),
        };

        Ok(pixels)
    }

    /// Decode and encode to PNG bytes.
    pub fn extract_png(&self) -> Result<Vec<u8>, WzPngParseError> {
        let rgba = self.extract_rgba()?;
        encode_png(&rgba, self.width, self.height)
    }
}

/// RGBA8888 → PNG via the image crate.
pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, WzPngParseError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(rgba, width, height, ExtendedColorType::Rgba8)?;
    Ok(out)
}

/// Truncation-tolerant inflate: many archived payloads end without the
/// deflate end-of-stream marker, so input running dry after `expected`
/// bytes counts as success and a shorter tail is returned as-is with a
/// warning.
pub fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>, WzPngParseError> {
    let mut decompress = Decompress::new(true);
    let mut out: Vec<u8> = Vec::with_capacity(expected);

    loop {
        let consumed = decompress.total_in() as usize;
        let produced = out.len();

        let status = match decompress.decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
        {
            Ok(status) => status,
            Err(e) => {
                if out.len() >= expected {
                    break;
                }
                return Err(WzPngParseError::from(e));
            }
        };

        if matches!(status, Status::StreamEnd) || out.len() >= expected {
            break;
        }

        if decompress.total_in() as usize >= data.len() {
            warn!(
                produced = out.len(),
                expected, "compressed pixel data ended early"
            );
            break;
        }

        if decompress.total_in() as usize == consumed && out.len() == produced {
            if out.len() < out.capacity() {
                // no forward progress possible
                warn!(
                    produced = out.len(),
                    expected, "inflate stalled before expected size"
                );
                break;
            }
            out.reserve(expected.max(4096) - out.len());
        }
    }

    Ok(out)
}

#[inline]
fn rgb565_to_rgba(color: u16) -> [u8; 4] {
    let r = ((color >> 11) & 0x1F) as u8;
    let g = ((color >> 5) & 0x3F) as u8;
    let b = (color & 0x1F) as u8;
    [r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2, 255]
}

#[inline]
fn argb1555_to_rgba(color: u16) -> [u8; 4] {
    let a = if color & 0x8000 != 0 { 255 } else { 0 };
    let r = ((color >> 10) & 0x1F) as u8;
    let g = ((color >> 5) & 0x1F) as u8;
    let b = (color & 0x1F) as u8;
    [r << 3 | r >> 2, g << 3 | g >> 2, b << 3 | b >> 2, a]
}

fn unpack_bgra4444(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; (width * height * 4) as usize];

    for (p, chunk) in raw
        .chunks_exact(2)
        .take((width * height) as usize)
        .enumerate()
    {
        let b = chunk[0] & 0x0F;
        let g = chunk[0] >> 4;
        let r = chunk[1] & 0x0F;
        let a = chunk[1] >> 4;

        out[p * 4..p * 4 + 4].copy_from_slice(&[
            r | (r << 4),
            g | (g << 4),
            b | (b << 4),
            a | (a << 4),
        ]);
    }
    out
}

fn unpack_bgra8888(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; (width * height * 4) as usize];

    for (p, chunk) in raw
        .chunks_exact(4)
        .take((width * height) as usize)
        .enumerate()
    {
        out[p * 4..p * 4 + 4].copy_from_slice(&[chunk[2], chunk[1], chunk[0], chunk[3]]);
    }
    out
}

fn unpack_rgb565(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; (width * height * 4) as usize];

    for (p, chunk) in raw
        .chunks_exact(2)
        .take((width * height) as usize)
        .enumerate()
    {
        let color = rgb565_to_rgba(u16::from_le_bytes([chunk[0], chunk[1]]));
        out[p * 4..p * 4 + 4].copy_from_slice(&color);
    }
    out
}

fn unpack_argb1555(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; (width * height * 4) as usize];

    for (p, chunk) in raw
        .chunks_exact(2)
        .take((width * height) as usize)
        .enumerate()
    {
        let color = argb1555_to_rgba(u16::from_le_bytes([chunk[0], chunk[1]]));
        out[p * 4..p * 4 + 4].copy_from_slice(&color);
    }
    out
}

/// Format 517: one RGB565 color per 16×16 macro-block, expanded here to a
/// full 2-byte-per-pixel grid and then decoded as plain RGB565.
fn expand_rgb565_blocks(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut pixels = vec![0u8; w * h * 2];

    let blocks_x = w.div_ceil(16);
    let blocks_y = h.div_ceil(16);

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let idx = (by * blocks_x + bx) * 2;
            if idx + 1 >= raw.len() {
                return pixels;
            }

            for y in by * 16..(by * 16 + 16).min(h) {
                for x in bx * 16..(bx * 16 + 16).min(w) {
                    let p = (y * w + x) * 2;
                    pixels[p] = raw[idx];
                    pixels[p + 1] = raw[idx + 1];
                }
            }
        }
    }
    pixels
}

/// Four-entry color palette shared by DXT3 and DXT5 blocks.
fn expand_color_table(table: &mut [[u8; 3]; 4], c0: u16, c1: u16) {
    let [r0, g0, b0, _] = rgb565_to_rgba(c0);
    let [r1, g1, b1, _] = rgb565_to_rgba(c1);
    table[0] = [r0, g0, b0];
    table[1] = [r1, g1, b1];

    let (r0, g0, b0) = (r0 as i32, g0 as i32, b0 as i32);
    let (r1, g1, b1) = (r1 as i32, g1 as i32, b1 as i32);

    if c0 > c1 {
        table[2] = [
            ((r0 * 2 + r1 + 1) / 3) as u8,
            ((g0 * 2 + g1 + 1) / 3) as u8,
            ((b0 * 2 + b1 + 1) / 3) as u8,
        ];
        table[3] = [
            ((r0 + r1 * 2 + 1) / 3) as u8,
            ((g0 + g1 * 2 + 1) / 3) as u8,
            ((b0 + b1 * 2 + 1) / 3) as u8,
        ];
    } else {
        table[2] = [
            ((r0 + r1) / 2) as u8,
            ((g0 + g1) / 2) as u8,
            ((b0 + b1) / 2) as u8,
        ];
        table[3] = [0, 0, 0];
    }
}

fn expand_color_index_table(table: &mut [u8; 16], bytes: &[u8]) {
    for (i, byte) in bytes.iter().take(4).enumerate() {
        table[i * 4] = byte & 0x03;
        table[i * 4 + 1] = (byte >> 2) & 0x03;
        table[i * 4 + 2] = (byte >> 4) & 0x03;
        table[i * 4 + 3] = (byte >> 6) & 0x03;
    }
}

/// DXT3 explicit alpha: 16 nibbles, scaled to 8 bits.
fn expand_alpha_table_dxt3(table: &mut [u8; 16], bytes: &[u8]) {
    for (i, byte) in bytes.iter().take(8).enumerate() {
        let lo = byte & 0x0F;
        let hi = byte >> 4;
        table[i * 2] = lo | (lo << 4);
        table[i * 2 + 1] = hi | (hi << 4);
    }
}

/// DXT5 interpolated alpha: seven-way ramp when a0 > a1, five-way with
/// pinned 0/255 endpoints otherwise.
fn expand_alpha_table_dxt5(table: &mut [u8; 8], a0: u8, a1: u8) {
    table[0] = a0;
    table[1] = a1;
    let (a0, a1) = (a0 as i32, a1 as i32);

    if a0 > a1 {
        for i in 1..=6i32 {
            table[(i + 1) as usize] = (((7 - i) * a0 + i * a1 + 3) / 7) as u8;
        }
    } else {
        for i in 1..=4i32 {
            table[(i + 1) as usize] = (((5 - i) * a0 + i * a1 + 2) / 5) as u8;
        }
        table[6] = 0;
        table[7] = 255;
    }
}

fn expand_alpha_index_table_dxt5(table: &mut [u8; 16], bytes: &[u8]) {
    for i in 0..2 {
        let flags = bytes[i * 3] as u32 | (bytes[i * 3 + 1] as u32) << 8 | (bytes[i * 3 + 2] as u32) << 16;
        for j in 0..8 {
            table[i * 8 + j] = ((flags >> (3 * j)) & 0x07) as u8;
        }
    }
}

fn unpack_dxt3(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; w * h * 4];

    let mut color_table = [[0u8; 3]; 4];
    let mut color_idx = [0u8; 16];
    let mut alpha_table = [0u8; 16];

    for y in (0..h).step_by(4) {
        for x in (0..w).step_by(4) {
            let offset = x * 4 + y * w;
            if offset + 16 > raw.len() {
                return out;
            }

            expand_alpha_table_dxt3(&mut alpha_table, &raw[offset..offset + 8]);
            let c0 = u16::from_le_bytes([raw[offset + 8], raw[offset + 9]]);
            let c1 = u16::from_le_bytes([raw[offset + 10], raw[offset + 11]]);
            expand_color_table(&mut color_table, c0, c1);
            expand_color_index_table(&mut color_idx, &raw[offset + 12..offset + 16]);

            for j in 0..4 {
                for i in 0..4 {
                    if x + i < w && y + j < h {
                        let p = ((y + j) * w + x + i) * 4;
                        let color = color_table[color_idx[j * 4 + i] as usize];
                        out[p..p + 3].copy_from_slice(&color);
                        out[p + 3] = alpha_table[j * 4 + i];
                    }
                }
            }
        }
    }
    out
}

fn unpack_dxt5(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; w * h * 4];

    let mut color_table = [[0u8; 3]; 4];
    let mut color_idx = [0u8; 16];
    let mut alpha_table = [0u8; 8];
    let mut alpha_idx = [0u8; 16];

    for y in (0..h).step_by(4) {
        for x in (0..w).step_by(4) {
            let offset = x * 4 + y * w;
            if offset + 16 > raw.len() {
                return out;
            }

            expand_alpha_table_dxt5(&mut alpha_table, raw[offset], raw[offset + 1]);
            expand_alpha_index_table_dxt5(&mut alpha_idx, &raw[offset + 2..offset + 8]);
            let c0 = u16::from_le_bytes([raw[offset + 8], raw[offset + 9]]);
            let c1 = u16::from_le_bytes([raw[offset + 10], raw[offset + 11]]);
            expand_color_table(&mut color_table, c0, c1);
            expand_color_index_table(&mut color_idx, &raw[offset + 12..offset + 16]);

            for j in 0..4 {
                for i in 0..4 {
                    if x + i < w && y + j < h {
                        let p = ((y + j) * w + x + i) * 4;
                        let color = color_table[color_idx[j * 4 + i] as usize];
                        out[p..p + 3].copy_from_slice(&color);
                        out[p + 3] = alpha_table[alpha_idx[j * 4 + i] as usize];
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bgra4444_nibble_expansion() {
        // 2x2, words 0x0F0F 0xF0F0 0xFF00 0x00FF
        let raw = [0x0F, 0x0F, 0xF0, 0xF0, 0x00, 0xFF, 0xFF, 0x00];
        let out = unpack_bgra4444(&raw, 2, 2);

        assert_eq!(&out[0..4], &[255, 0, 255, 0]);
        assert_eq!(&out[4..8], &[0, 255, 0, 255]);
        assert_eq!(&out[8..12], &[255, 0, 0, 255]);
        assert_eq!(&out[12..16], &[0, 255, 255, 0]);
    }

    #[test]
    fn test_bgra8888_channel_swap() {
        let raw = [0x10, 0x20, 0x30, 0x40];
        let out = unpack_bgra8888(&raw, 1, 1);
        assert_eq!(out, [0x30, 0x20, 0x10, 0x40]);
    }

    #[test]
    fn test_rgb565_rescale() {
        assert_eq!(rgb565_to_rgba(0xFFFF), [255, 255, 255, 255]);
        assert_eq!(rgb565_to_rgba(0x0000), [0, 0, 0, 255]);
        assert_eq!(rgb565_to_rgba(0xF800), [255, 0, 0, 255]);
        assert_eq!(rgb565_to_rgba(0x07E0), [0, 255, 0, 255]);
        assert_eq!(rgb565_to_rgba(0x001F), [0, 0, 255, 255]);
    }

    #[test]
    fn test_argb1555_alpha_bit() {
        assert_eq!(argb1555_to_rgba(0xFFFF), [255, 255, 255, 255]);
        assert_eq!(argb1555_to_rgba(0x7FFF), [255, 255, 255, 0]);
        assert_eq!(argb1555_to_rgba(0x8000), [0, 0, 0, 255]);
    }

    #[test]
    fn test_macro_block_fill() {
        // 32x16: two blocks, red then blue
        let raw = [0x00, 0xF8, 0x1F, 0x00];
        let expanded = expand_rgb565_blocks(&raw, 32, 16);
        let out = unpack_rgb565(&expanded, 32, 16);

        // top-left pixel of each block
        assert_eq!(&out[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out[16 * 4..16 * 4 + 4], &[0, 0, 255, 255]);
        // last pixel of the row stays in the second block
        assert_eq!(&out[31 * 4..31 * 4 + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_dxt5_alpha_ramp() {
        let mut table = [0u8; 8];

        expand_alpha_table_dxt5(&mut table, 7, 0);
        assert_eq!(table[0], 7);
        assert_eq!(table[1], 0);
        assert_eq!(table[2], 6);
        assert_eq!(table[7], 1);

        expand_alpha_table_dxt5(&mut table, 0, 255);
        assert_eq!(table[6], 0);
        assert_eq!(table[7], 255);
    }

    #[test]
    fn test_decoded_area() {
        // every decoder yields exactly 4*W*H bytes regardless of input
        assert_eq!(unpack_bgra4444(&[], 3, 5).len(), 60);
        assert_eq!(unpack_bgra8888(&[], 4, 4).len(), 64);
        assert_eq!(unpack_rgb565(&[0, 0], 7, 2).len(), 56);
        assert_eq!(unpack_dxt3(&[], 8, 8).len(), 256);
        assert_eq!(unpack_dxt5(&[], 8, 8).len(), 256);
    }

    #[test]
    fn test_inflate_round_trip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let inflated = inflate(&compressed, payload.len()).unwrap();
        assert_eq!(inflated, payload);
    }

    #[test]
    fn test_inflate_tolerates_missing_tail() {
        let payload = vec![0x42u8; 8192];

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        // drop the zlib checksum trailer; the expected byte count is still reached
        let truncated = &compressed[..compressed.len() - 4];
        let inflated = inflate(truncated, payload.len()).unwrap();
        assert_eq!(inflated.len(), payload.len());
    }

    #[test]
    fn test_from_rgba_round_trip() {
        let rgba: Vec<u8> = (0..64u8).collect();
        let png = WzPng::from_rgba(4, 4, &rgba).unwrap();

        assert_eq!(png.format(), 2);
        assert_eq!(png.extract_rgba().unwrap(), rgba);
    }
}
