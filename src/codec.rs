//! Wire form of a token.
//!
//! ```text
//! offset  len  contents
//! 0       6    sentinel
//! 6       8    iv suffix (low 8 bytes of the 12-byte iv)
//! 14      16   sealed BE64(counter) || BE64(expiry_unix)
//! ```
//!
//! The 30 bytes are rendered as unpadded URL-safe base64, 40 characters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use subtle::ConstantTimeEq;

use crate::envelope::{Envelope, Iv, BLOCK_LEN, IV_SUFFIX_LEN};
use crate::error::Rejection;

/// Protocol and version tag. Changing it breaks every outstanding token.
pub(crate) const SENTINEL: [u8; 6] = *b"nonce1";
pub(crate) const TOKEN_BYTES: usize = SENTINEL.len() + IV_SUFFIX_LEN + BLOCK_LEN;
pub(crate) const TOKEN_CHARS: usize = 40;

const IV_OFFSET: usize = SENTINEL.len();
const SEALED_OFFSET: usize = IV_OFFSET + IV_SUFFIX_LEN;

/// The authenticated `(counter, expiry)` pair carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TokenClaims {
    pub counter: u64,
    pub expiry: u64,
}

impl TokenClaims {
    fn to_plaintext(self) -> [u8; BLOCK_LEN] {
        let mut out = [0u8; BLOCK_LEN];
        out[..8].copy_from_slice(&self.counter.to_be_bytes());
        out[8..].copy_from_slice(&self.expiry.to_be_bytes());
        out
    }

    fn from_plaintext(block: &[u8; BLOCK_LEN]) -> Self {
        let mut counter = [0u8; 8];
        let mut expiry = [0u8; 8];
        counter.copy_from_slice(&block[..8]);
        expiry.copy_from_slice(&block[8..]);
        Self {
            counter: u64::from_be_bytes(counter),
            expiry: u64::from_be_bytes(expiry),
        }
    }
}

/// Largest values an opened block may carry and still be one of ours.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClaimBounds {
    pub max_counter: u64,
    pub max_expiry: u64,
}

impl ClaimBounds {
    fn admits(&self, claims: &TokenClaims) -> bool {
        (1..=self.max_counter).contains(&claims.counter) && claims.expiry <= self.max_expiry
    }
}

pub(crate) fn encode(envelope: &Envelope, claims: TokenClaims, iv: &Iv) -> String {
    let sealed = envelope.seal(&claims.to_plaintext(), iv);

    let mut wire = [0u8; TOKEN_BYTES];
    wire[..IV_OFFSET].copy_from_slice(&SENTINEL);
    wire[IV_OFFSET..SEALED_OFFSET].copy_from_slice(&iv.suffix());
    wire[SEALED_OFFSET..].copy_from_slice(&sealed);

    let token = URL_SAFE_NO_PAD.encode(wire);
    debug_assert_eq!(token.len(), TOKEN_CHARS);
    token
}

/// Decode and authenticate a token. Expiry against the clock and the
/// ledger are the caller's business.
pub(crate) fn decode(
    envelope: &Envelope,
    token: &str,
    bounds: ClaimBounds,
) -> Result<TokenClaims, Rejection> {
    if token.len() != TOKEN_CHARS {
        return Err(Rejection::Malformed);
    }
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Rejection::Malformed)?;
    let wire: [u8; TOKEN_BYTES] = raw.try_into().map_err(|_| Rejection::Malformed)?;

    if !bool::from(wire[..IV_OFFSET].ct_eq(&SENTINEL)) {
        return Err(Rejection::SentinelMismatch);
    }

    let mut suffix = [0u8; IV_SUFFIX_LEN];
    suffix.copy_from_slice(&wire[IV_OFFSET..SEALED_OFFSET]);
    let mut sealed = [0u8; BLOCK_LEN];
    sealed.copy_from_slice(&wire[SEALED_OFFSET..]);

    let plaintext = envelope.open(&sealed, &Iv::from_suffix(suffix));
    let claims = TokenClaims::from_plaintext(&plaintext);
    if !bounds.admits(&claims) {
        return Err(Rejection::Unauthentic);
    }
    Ok(claims)
}
