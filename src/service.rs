use std::sync::{Arc, OnceLock};

use tracing::{debug, info, trace, warn};

use crate::codec::{self, ClaimBounds, TokenClaims};
use crate::counter::CounterSource;
use crate::envelope::{Envelope, Iv};
use crate::error::{NonceError, Rejection};
use crate::ledger::RedemptionLedger;
use crate::random::{OsRandomSource, RandomSource};
use crate::time::{unix_to_system_time, SystemTimeProvider, TimeProvider};
use crate::types::{IssuedNonce, NonceServiceConfig, NonceStatus};

/// Issue and redeem single-use nonces.
///
/// Implementations are shared across threads; every method takes `&self`.
pub trait NonceService: Send + Sync {
    /// Prepare key material. Must succeed before `get` or `redeem` do anything useful.
    fn initialize(&self) -> Result<(), NonceError>;

    /// Mint a fresh token.
    fn get(&self) -> Result<IssuedNonce, NonceError>;

    /// Spend a token. Returns `true` at most once per issued token, and never
    /// after its expiry.
    fn redeem(&self, token: &str) -> bool;

    /// Reclaim memory held for expired tokens and report counters.
    fn tidy(&self) -> NonceStatus;

    /// Whether a token is rejected on its second redemption.
    fn is_strict(&self) -> bool;

    /// Whether tokens minted here redeem on other instances.
    fn is_cross_node(&self) -> bool;
}

/// Nonce service whose tokens carry their own sealed counter and expiry.
///
/// `initialize` is idempotent: later calls keep the first key, so tokens
/// already handed out remain redeemable.
pub struct EncryptedNonceService<T = SystemTimeProvider, R = OsRandomSource>
where
    T: TimeProvider,
    R: RandomSource,
{
    config: NonceServiceConfig,
    envelope: OnceLock<Envelope>,
    counter: CounterSource,
    ledger: RedemptionLedger,
    time_provider: Arc<T>,
    random: Arc<R>,
}

impl EncryptedNonceService<SystemTimeProvider> {
    pub fn new(config: NonceServiceConfig) -> Result<Self, NonceError> {
        Self::with_time_provider(config, Arc::new(SystemTimeProvider))
    }
}

impl<T: TimeProvider> EncryptedNonceService<T> {
    pub fn with_time_provider(
        config: NonceServiceConfig,
        time_provider: Arc<T>,
    ) -> Result<Self, NonceError> {
        Self::with_providers(config, time_provider, Arc::new(OsRandomSource))
    }
}

impl<T, R> EncryptedNonceService<T, R>
where
    T: TimeProvider,
    R: RandomSource,
{
    pub fn with_providers(
        config: NonceServiceConfig,
        time_provider: Arc<T>,
        random: Arc<R>,
    ) -> Result<Self, NonceError> {
        config.validate()?;
        Ok(Self {
            config,
            envelope: OnceLock::new(),
            counter: CounterSource::new(),
            ledger: RedemptionLedger::new(),
            time_provider,
            random,
        })
    }

    pub fn config(&self) -> &NonceServiceConfig {
        &self.config
    }

    fn try_redeem(&self, token: &str) -> Result<u64, Rejection> {
        let envelope = self.envelope.get().ok_or(Rejection::Uninitialized)?;
        let now = self.time_provider.now_seconds();
        let bounds = ClaimBounds {
            max_counter: self.counter.issued(),
            max_expiry: now.saturating_add(self.config.validity_secs()),
        };

        let claims = codec::decode(envelope, token, bounds)?;
        if claims.expiry <= now {
            return Err(Rejection::Expired);
        }
        self.ledger.redeem(claims.counter, claims.expiry, now)?;
        Ok(claims.counter)
    }
}

impl<T, R> NonceService for EncryptedNonceService<T, R>
where
    T: TimeProvider,
    R: RandomSource,
{
    fn initialize(&self) -> Result<(), NonceError> {
        if self.envelope.get().is_some() {
            return Ok(());
        }
        let envelope = Envelope::generate(self.random.as_ref()).map_err(|err| {
            warn!(error = %err, "nonce key generation failed");
            err
        })?;
        let key_id = envelope.key_id();
        // A concurrent initialize may have won; its key stays.
        if self.envelope.set(envelope).is_ok() {
            info!(
                key_id = %key_id,
                validity_secs = self.config.validity_secs(),
                "nonce service initialized"
            );
        }
        Ok(())
    }

    fn get(&self) -> Result<IssuedNonce, NonceError> {
        let envelope = self.envelope.get().ok_or(NonceError::NotInitialized)?;

        let counter = self.counter.advance();
        let expiry = self
            .time_provider
            .now_seconds()
            .saturating_add(self.config.validity_secs());
        let iv = Iv::generate(self.random.as_ref()).map_err(|err| {
            warn!(counter, error = %err, "iv generation failed, counter abandoned");
            err
        })?;

        let token = codec::encode(envelope, TokenClaims { counter, expiry }, &iv);
        self.ledger.record_issued(expiry, counter);
        trace!(counter, expiry, "nonce issued");

        Ok(IssuedNonce {
            token,
            expiry: unix_to_system_time(expiry),
        })
    }

    fn redeem(&self, token: &str) -> bool {
        match self.try_redeem(token) {
            Ok(counter) => {
                trace!(counter, floor = self.ledger.floor(), "nonce redeemed");
                true
            }
            Err(reason) => {
                debug!(%reason, "nonce rejected");
                false
            }
        }
    }

    fn tidy(&self) -> NonceStatus {
        let report = self.ledger.tidy(self.time_provider.now_seconds());
        let issued = self.counter.issued();
        if report.freed_buckets > 0 {
            debug!(
                freed_buckets = report.freed_buckets,
                min_counter = report.min_counter,
                "nonce ledger tidied"
            );
        }

        NonceStatus {
            issued,
            outstanding: issued.saturating_sub(report.min_counter),
            message: format!(
                "min counter {}; {} issued and {} redeemed expiry buckets; {} out-of-order redemptions held",
                report.min_counter,
                report.issued_buckets,
                report.redeemed_buckets,
                report.pending_counters
            ),
        }
    }

    fn is_strict(&self) -> bool {
        true
    }

    fn is_cross_node(&self) -> bool {
        false
    }
}
