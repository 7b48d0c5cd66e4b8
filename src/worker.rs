//! Periodic tidying on a dedicated thread.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::error::NonceError;
use crate::service::NonceService;

/// Handle to a background thread calling [`NonceService::tidy`] on a fixed cadence.
///
/// Dropping the handle stops the thread and waits for it.
#[derive(Debug)]
pub struct TidyWorker {
    stop: Option<Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl TidyWorker {
    pub fn spawn<S>(service: Arc<S>, interval: Duration) -> Result<Self, NonceError>
    where
        S: NonceService + ?Sized + 'static,
    {
        if interval.is_zero() {
            return Err(NonceError::InvalidConfig(
                "tidy interval must be non-zero".into(),
            ));
        }

        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let join = thread::Builder::new()
            .name("nonce-tidy".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let status = service.tidy();
                        trace!(
                            issued = status.issued,
                            outstanding = status.outstanding,
                            "periodic nonce tidy"
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        debug!(interval = ?interval, "tidy worker started");

        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    /// Stop the worker and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Dropping the sender disconnects the channel, which ends the loop.
        self.stop.take();
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(()) => debug!("tidy worker stopped"),
                Err(_) => warn!("tidy worker thread panicked"),
            }
        }
    }
}

impl Drop for TidyWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
