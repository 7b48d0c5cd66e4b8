use std::time::{Duration, SystemTime};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::NonceError;

/// Configuration used by the encrypted nonce service.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct NonceServiceConfig {
    /// Time between issuance and the expiry sealed into the token.
    pub validity: Duration,
}

impl Default for NonceServiceConfig {
    fn default() -> Self {
        Self {
            validity: Duration::from_secs(90),
        }
    }
}

impl NonceServiceConfig {
    pub fn validate(&self) -> Result<(), NonceError> {
        // Expiry buckets are whole seconds; anything finer would be truncated silently.
        if self.validity < Duration::from_secs(1) {
            return Err(NonceError::InvalidConfig(
                "validity must be at least 1 second".into(),
            ));
        }
        if self.validity.subsec_nanos() != 0 {
            return Err(NonceError::InvalidConfig(
                "validity must be a whole number of seconds".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn validity_secs(&self) -> u64 {
        self.validity.as_secs()
    }
}

impl NonceServiceConfigBuilder {
    pub fn build_validated(self) -> Result<NonceServiceConfig, NonceError> {
        let config = self
            .build()
            .map_err(|e| NonceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// A freshly minted token and the instant after which it stops redeeming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedNonce {
    pub token: String,
    pub expiry: SystemTime,
}

/// Snapshot returned by `tidy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceStatus {
    /// Counters handed out so far.
    pub issued: u64,
    /// Counters above the redemption floor, i.e. not yet known to be spent.
    pub outstanding: u64,
    pub message: String,
}
