/// Errors surfaced by [`crate::NonceService::initialize`] and [`crate::NonceService::get`].
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("random source failed: {0}")]
    RandomSource(#[from] rand::Error),
    #[error("cipher setup failed: {0}")]
    CipherSetup(String),
    #[error("nonce service is not initialized")]
    NotInitialized,
    #[error("failed to spawn tidy worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Why a redemption was refused.
///
/// Only ever logged. Callers of `redeem` see a bare `false` so the
/// distinction cannot be used as an oracle on token structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Rejection {
    #[error("service not initialized")]
    Uninitialized,
    #[error("malformed token")]
    Malformed,
    #[error("sentinel mismatch")]
    SentinelMismatch,
    #[error("token failed authentication")]
    Unauthentic,
    #[error("token expired")]
    Expired,
    #[error("counter at or below the redemption floor")]
    Consumed,
    #[error("token already redeemed")]
    Replayed,
}
