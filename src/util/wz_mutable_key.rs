use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

use super::maple_crypto_constants::{get_trimmed_user_key, MAPLESTORY_USERKEY_DEFAULT};

/// Keys are always grown a whole batch at a time so repeated small reads
/// don't re-enter the cipher.
const BATCH_SIZE: usize = 4096;

/// The XOR keystream masking names and string values.
///
/// Derived by chaining AES-256-ECB: the first block is the 4-byte IV tiled
/// to 16 bytes, every following block is the previous ciphertext. An
/// all-zero IV means the archive is unencrypted and the stream is all
/// zeros.
#[derive(Debug, Clone)]
pub struct WzMutableKey {
    pub iv: [u8; 4],
    keys: Vec<u8>,
    aes_key: [u8; 32],
    /// iv == 0, the stream is all zeros and XOR is skipped entirely
    pub without_decrypt: bool,
}

impl WzMutableKey {
    pub fn new(iv: [u8; 4], aes_key: [u8; 32]) -> Self {
        Self {
            iv,
            keys: vec![],
            aes_key,
            without_decrypt: iv == [0; 4],
        }
    }
    pub fn from_iv(iv: [u8; 4]) -> Self {
        Self::new(iv, get_trimmed_user_key(&MAPLESTORY_USERKEY_DEFAULT))
    }

    /// Keystream byte at `index`, growing the stream as needed.
    pub fn at(&mut self, index: usize) -> u8 {
        if self.without_decrypt {
            return 0;
        }
        if self.keys.len() <= index {
            self.ensure_key_size(index + 1);
        }
        self.keys[index]
    }
    /// Keystream byte at `index` if already generated.
    pub fn try_at(&self, index: usize) -> Option<&u8> {
        self.keys.get(index)
    }
    pub fn is_enough(&self, size: usize) -> bool {
        self.keys.len() >= size || self.without_decrypt
    }

    /// XOR `data` with the stream prefix. The stream must already cover
    /// `data.len()` bytes, see [`WzMutableKey::ensure_key_size`].
    pub fn decrypt_slice(&self, data: &mut [u8]) {
        if self.without_decrypt {
            return;
        }
        data.iter_mut()
            .zip(&self.keys)
            .for_each(|(byte, key)| *byte ^= key);
    }

    /// Grow the stream to at least `size` bytes, in 4 KiB batches.
    pub fn ensure_key_size(&mut self, size: usize) {
        if self.is_enough(size) {
            return;
        }

        let size = size.div_ceil(BATCH_SIZE) * BATCH_SIZE;
        self.keys.reserve(size - self.keys.len());

        let cipher = Aes256::new(&self.aes_key.into());

        if self.keys.is_empty() {
            let mut block = Block::default();
            for (index, item) in block.iter_mut().enumerate() {
                *item = self.iv[index % 4];
            }
            cipher.encrypt_block(&mut block);
            self.keys.extend_from_slice(&block);
        }

        while self.keys.len() < size {
            let mut block = Block::clone_from_slice(&self.keys[self.keys.len() - 16..]);
            cipher.encrypt_block(&mut block);
            self.keys.extend_from_slice(&block);
        }
    }
}
