//! Process-lifetime key and the block sealing built on it.
//!
//! The sealed block must be exactly as long as the 16-byte plaintext, so no
//! tag is appended. Instead the plaintext is enciphered under an iv-derived
//! whitening mask:
//!
//! ```text
//! mask   = AES-256_K(iv || 0x00000000)
//! sealed = AES-256_K(plaintext XOR mask)
//! ```
//!
//! Touching any bit of `sealed` or of the iv turns the opened block into
//! pseudo-random noise. The codec rejects anything whose counter and expiry
//! fall outside what this instance could have issued, which is what makes
//! the envelope authenticated.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use zeroize::Zeroize;

use crate::error::NonceError;
use crate::random::RandomSource;

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const BLOCK_LEN: usize = 16;
/// Random bytes of the iv that travel on the wire.
pub(crate) const IV_SUFFIX_LEN: usize = 8;
/// Full iv width; the leading bytes are always zero.
pub(crate) const IV_LEN: usize = 12;

/// AEAD-style nonce. Only the low eight bytes are random.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Iv([u8; IV_LEN]);

impl Iv {
    pub fn generate(random: &dyn RandomSource) -> Result<Self, NonceError> {
        let mut suffix = [0u8; IV_SUFFIX_LEN];
        random.fill(&mut suffix)?;
        Ok(Self::from_suffix(suffix))
    }

    pub fn from_suffix(suffix: [u8; IV_SUFFIX_LEN]) -> Self {
        let mut iv = [0u8; IV_LEN];
        iv[IV_LEN - IV_SUFFIX_LEN..].copy_from_slice(&suffix);
        Self(iv)
    }

    pub fn suffix(&self) -> [u8; IV_SUFFIX_LEN] {
        let mut suffix = [0u8; IV_SUFFIX_LEN];
        suffix.copy_from_slice(&self.0[IV_LEN - IV_SUFFIX_LEN..]);
        suffix
    }
}

pub(crate) struct Envelope {
    cipher: Aes256,
    fingerprint: [u8; 8],
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl Envelope {
    /// Draw a fresh key from `random`.
    pub fn generate(random: &dyn RandomSource) -> Result<Self, NonceError> {
        let mut key = [0u8; KEY_LEN];
        random.fill(&mut key)?;
        let envelope = Self::from_key(&key);
        key.zeroize();
        envelope
    }

    pub fn from_key(key: &[u8]) -> Result<Self, NonceError> {
        let cipher =
            Aes256::new_from_slice(key).map_err(|e| NonceError::CipherSetup(e.to_string()))?;
        let digest = blake3::hash(key);
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&digest.as_bytes()[..8]);
        Ok(Self {
            cipher,
            fingerprint,
        })
    }

    /// Short public identifier of the key, safe to log.
    pub fn key_id(&self) -> String {
        hex::encode(self.fingerprint)
    }

    pub fn seal(&self, plaintext: &[u8; BLOCK_LEN], iv: &Iv) -> [u8; BLOCK_LEN] {
        let mask = self.mask(iv);
        let mut block = Block::from(xor(plaintext, &mask));
        self.cipher.encrypt_block(&mut block);
        to_array(&block)
    }

    pub fn open(&self, sealed: &[u8; BLOCK_LEN], iv: &Iv) -> [u8; BLOCK_LEN] {
        let mut block = Block::from(*sealed);
        self.cipher.decrypt_block(&mut block);
        xor(&to_array(&block), &self.mask(iv))
    }

    fn mask(&self, iv: &Iv) -> [u8; BLOCK_LEN] {
        let mut input = [0u8; BLOCK_LEN];
        input[..IV_LEN].copy_from_slice(&iv.0);
        let mut block = Block::from(input);
        self.cipher.encrypt_block(&mut block);
        to_array(&block)
    }
}

fn xor(a: &[u8; BLOCK_LEN], b: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let mut out = [0u8; BLOCK_LEN];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

fn to_array(block: &Block) -> [u8; BLOCK_LEN] {
    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(block.as_slice());
    out
}
