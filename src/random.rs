use rand::rngs::OsRng;
use rand::RngCore;

/// Source of key and iv bytes. Must be cryptographically secure.
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// OS randomness that can be switched off to exercise failure paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct SwitchableRandomSource {
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl SwitchableRandomSource {
    pub fn failing() -> Self {
        let source = Self::default();
        source.set_failing(true);
        source
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl RandomSource for SwitchableRandomSource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(rand::Error::new("random source unavailable"));
        }
        OsRandomSource.fill(dest)
    }
}
