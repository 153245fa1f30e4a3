/// IV for old Global MapleStory archives.
pub const WZ_GMSIV: [u8; 4] = [0x4D, 0x23, 0xC7, 0x2B];

/// IV for 新楓之谷 / MapleSEA / EMS archives.
pub const WZ_MSEAIV: [u8; 4] = [0xB9, 0x7D, 0x63, 0xE9];

/// IV for BMS and every archive that ships without string encryption.
pub const WZ_BMSIV: [u8; 4] = [0; 4];

/// The 128-byte user key baked into the client. Only every 4th byte
/// carries information, see [`get_trimmed_user_key`].
pub const MAPLESTORY_USERKEY_DEFAULT: [u8; 128] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00,
    0x00, 0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00,
    0x00, 0x00, 0xE3, 0x00, 0x00, 0x00, 0x5E, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x00, 0x59, 0x00, 0x00, 0x00, 0x1A, 0x00, 0x00, 0x00,
    0x4F, 0x00, 0x00, 0x00, 0x54, 0x00, 0x00, 0x00, 0x9A, 0x00, 0x00, 0x00, 0x3B, 0x00, 0x00,
    0x00, 0xCE, 0x00, 0x00, 0x00, 0xB9, 0x00, 0x00, 0x00, 0x71, 0x00, 0x00, 0x00, 0xD2, 0x00,
    0x00, 0x00, 0x63, 0x00, 0x00, 0x00, 0xA1, 0x00, 0x00, 0x00, 0xF8, 0x00, 0x00, 0x00, 0x51,
    0x00, 0x00, 0x00, 0x8E, 0x00, 0x00, 0x00, 0x7B, 0x00, 0x00, 0x00, 0x1E, 0x00, 0x00, 0x00,
    0xAA, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00,
];

/// Collapse the padded 128-byte user key into the 32-byte AES-256 key.
pub fn get_trimmed_user_key(key: &[u8; 128]) -> [u8; 32] {
    let mut trimmed = [0u8; 32];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        trimmed[i] = chunk[0];
    }
    trimmed
}
