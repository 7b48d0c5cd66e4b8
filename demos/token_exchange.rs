//! End-to-end demo of the nonce flow over an in-process transport.
//!
//! - Server task owns the nonce service and answers `NewNonce` / `Submit`.
//! - Client fetches a few nonces, spends them out of order, then tries a replay.
//! - A background tidy worker keeps the ledger trimmed meanwhile.
//!
//! Run with `RUST_LOG=encnonce=trace` to watch the ledger decisions.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use encnonce::{
    EncryptedNonceService, NonceService, NonceServiceConfigBuilder, NonceStatus, TidyWorker,
};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum Request {
    NewNonce(oneshot::Sender<Result<String, String>>),
    Submit(String, oneshot::Sender<bool>),
    Status(oneshot::Sender<NonceStatus>),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = NonceServiceConfigBuilder::default()
        .validity(Duration::from_secs(30))
        .build_validated()?;
    let service = Arc::new(EncryptedNonceService::new(config)?);
    service.initialize()?;
    let _tidy = TidyWorker::spawn(service.clone(), Duration::from_secs(5))?;

    let (req_tx, req_rx) = mpsc::channel::<Request>(8);
    let server = tokio::spawn(server_task(req_rx, service));

    let mut tokens = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = oneshot::channel();
        req_tx.send(Request::NewNonce(tx)).await?;
        tokens.push(rx.await?.map_err(|e| format!("server refused nonce: {e}"))?);
    }
    println!("issued {} nonces, e.g. {}", tokens.len(), tokens[0]);

    for i in [2, 0, 1, 0] {
        let (tx, rx) = oneshot::channel();
        req_tx.send(Request::Submit(tokens[i].clone(), tx)).await?;
        let verdict = if rx.await? { "accepted" } else { "rejected" };
        println!("nonce #{i}: {verdict}");
    }

    let (tx, rx) = oneshot::channel();
    req_tx.send(Request::Status(tx)).await?;
    println!("status: {}", serde_json::to_string_pretty(&rx.await?)?);

    drop(req_tx);
    server.await?;
    Ok(())
}

async fn server_task<S: NonceService + 'static>(
    mut req_rx: mpsc::Receiver<Request>,
    service: Arc<S>,
) {
    while let Some(req) = req_rx.recv().await {
        match req {
            Request::NewNonce(reply) => {
                let nonce = service.get().map(|n| n.token).map_err(|e| e.to_string());
                let _ = reply.send(nonce);
            }
            Request::Submit(token, reply) => {
                let _ = reply.send(service.redeem(&token));
            }
            Request::Status(reply) => {
                let _ = reply.send(service.tidy());
            }
        }
    }
}
