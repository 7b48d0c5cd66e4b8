//! Strict, single-use encrypted nonces.
//!
//! Tokens are stateless on the wire: each carries a sealed `(counter, expiry)`
//! pair under a key that lives only as long as the process. The server keeps
//! just enough state to refuse a second redemption:
//! - a floor below which every counter counts as spent,
//! - the highest counter issued per expiry second,
//! - counters redeemed out of order, grouped by expiry second.
//!
//! ```no_run
//! use encnonce::{EncryptedNonceService, NonceService, NonceServiceConfig};
//!
//! let service = EncryptedNonceService::new(NonceServiceConfig::default())?;
//! service.initialize()?;
//!
//! let nonce = service.get()?;
//! assert!(service.redeem(&nonce.token));
//! assert!(!service.redeem(&nonce.token));
//! # Ok::<(), encnonce::NonceError>(())
//! ```

mod codec;
mod counter;
mod envelope;
mod ledger;

pub mod error;
pub mod random;
pub mod service;
pub mod time;
pub mod types;
#[cfg(feature = "tidy-worker")]
pub mod worker;

pub use error::NonceError;
pub use random::{OsRandomSource, RandomSource};
pub use service::{EncryptedNonceService, NonceService};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use types::{IssuedNonce, NonceServiceConfig, NonceServiceConfigBuilder, NonceStatus};
#[cfg(feature = "tidy-worker")]
pub use worker::TidyWorker;
