use std::sync::{Arc, RwLock};

use crate::util::maple_crypto_constants::{WZ_BMSIV, WZ_GMSIV, WZ_MSEAIV};
use crate::util::wz_mutable_key::WzMutableKey;
use crate::WzSliceReader;

/// MapleStory regional variant, determines the IV for string decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WzMapleVersion {
    /// Global MapleStory (old)
    GMS,

    /// 新楓之谷 / MapleSEA / EMS (old)
    EMS,

    /// BMS and every region that ships unencrypted archives
    BMS,
}

pub fn get_iv_by_maple_version(version: WzMapleVersion) -> [u8; 4] {
    match version {
        WzMapleVersion::GMS => WZ_GMSIV,
        WzMapleVersion::EMS => WZ_MSEAIV,
        WzMapleVersion::BMS => WZ_BMSIV,
    }
}

/// Variants tried, in order, when the caller doesn't name one.
pub const GUESS_VERSIONS: [WzMapleVersion; 3] = [
    WzMapleVersion::BMS,
    WzMapleVersion::GMS,
    WzMapleVersion::EMS,
];

/// 64-bit clients drop the version header; offsets are derived from a
/// synthetic one starting here.
pub const WZ_VERSION_HEADER_64BIT_START: u16 = 770;

/// Hash of the patch version's decimal digits, the multiplier inside the
/// offset obfuscation.
pub fn calculate_version_hash(patch_version: i32) -> u32 {
    let mut version_hash = 0u32;

    for c in patch_version.to_string().chars() {
        version_hash = version_hash
            .wrapping_mul(32)
            .wrapping_add(c as u32)
            .wrapping_add(1);
    }
    version_hash
}

/// The byte stored in the classic uint16 version header.
pub fn encver_from_hash(version_hash: u32) -> u16 {
    let [b0, b1, b2, b3] = version_hash.to_le_bytes();
    (0xFF ^ b0 ^ b1 ^ b2 ^ b3) as u16
}

/// Hash for `patch_version` if it is consistent with the stored version
/// header, 0 otherwise. A 64-bit synthetic header (`encver == patch`)
/// matches unconditionally.
pub fn check_and_get_version_hash(encver: i32, patch_version: i32) -> u32 {
    let version_hash = calculate_version_hash(patch_version);

    if encver == patch_version {
        return version_hash;
    }

    if encver_from_hash(version_hash) as i32 == encver {
        version_hash
    } else {
        0
    }
}

/// Candidate patch versions for auto-detection: 770..=780 for 64-bit
/// archives; 83 first, then 1..=500, for classic ones.
pub fn version_candidates(is_64bit: bool) -> Box<dyn Iterator<Item = i32>> {
    if is_64bit {
        Box::new(
            (WZ_VERSION_HEADER_64BIT_START as i32)..=(WZ_VERSION_HEADER_64BIT_START as i32 + 10),
        )
    } else {
        Box::new(std::iter::once(83).chain((1..=500).filter(|v| *v != 83)))
    }
}

/// Verify an IV against a bare `.img` buffer: a valid image starts with
/// 0x73 and the `"Property"` marker string.
pub fn verify_iv_from_wz_img(buf: &[u8], iv: &[u8; 4]) -> bool {
    let keys = Arc::new(RwLock::new(WzMutableKey::from_iv(*iv)));
    let reader = WzSliceReader::new(buf, &keys);

    reader.seek(1);

    reader.read_wz_string().unwrap_or_default() == "Property"
}

/// Guess the IV of a bare `.img` buffer by trial against the known
/// regional variants.
pub fn guess_iv_from_wz_img(buf: &[u8]) -> Option<[u8; 4]> {
    if buf.first() != Some(&0x73) {
        return None;
    }

    GUESS_VERSIONS
        .iter()
        .map(|version| get_iv_by_maple_version(*version))
        .find(|iv| verify_iv_from_wz_img(buf, iv))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_hash() {
        // "83": ('8' + 1) * 32 + '3' + 1
        assert_eq!(calculate_version_hash(83), 1876);
        assert_eq!(calculate_version_hash(770), 59185);
    }

    #[test]
    fn test_encver() {
        assert_eq!(encver_from_hash(1876), 0xAC);
    }

    #[test]
    fn test_check_version_hash() {
        assert_eq!(check_and_get_version_hash(0xAC, 83), 1876);
        assert_eq!(check_and_get_version_hash(0xAC, 84), 0);
        // 64-bit synthetic header matches itself unconditionally
        assert_eq!(check_and_get_version_hash(770, 770), calculate_version_hash(770));
    }

    #[test]
    fn test_candidates_order() {
        let classic: Vec<i32> = version_candidates(false).take(3).collect();
        assert_eq!(classic, vec![83, 1, 2]);
        assert!(!version_candidates(false).any(|v| v == 501));
        assert_eq!(version_candidates(false).filter(|v| *v == 83).count(), 1);

        let wide: Vec<i32> = version_candidates(true).take(2).collect();
        assert_eq!(wide, vec![770, 771]);
    }
}
