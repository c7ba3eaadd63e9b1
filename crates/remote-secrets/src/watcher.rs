//! Poll loop fetching one secret from the store.
//!
//! The watcher owns the timer and the current [`WatchParameters`]. Each fetch
//! runs with the parameter lock held and sends its outcome through a
//! single-slot channel, so at most one fetch is in flight and at most one
//! outcome is buffered at any time.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::secret::{parse_secret_document, SecretContent};
use crate::store::StoreHandle;

/// Result of one fetch attempt.
pub type FetchOutcome = Result<SecretContent, FetchError>;

/// Everything that defines what the next fetch retrieves.
///
/// Replaced as a whole by [`Watcher::update_parameters`].
#[derive(Clone)]
pub struct WatchParameters {
    pub secret_id: String,
    pub version_stage: String,
    pub poll_interval: Duration,
    pub store: StoreHandle,
}

impl fmt::Debug for WatchParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchParameters")
            .field("secret_id", &self.secret_id)
            .field("version_stage", &self.version_stage)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

pub struct Watcher {
    params: Mutex<WatchParameters>,
    outcomes: mpsc::Sender<FetchOutcome>,
    interval_tx: watch::Sender<Duration>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("poll_interval", &*self.interval_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(params: WatchParameters, outcomes: mpsc::Sender<FetchOutcome>) -> Self {
        let (interval_tx, _) = watch::channel(params.poll_interval);
        Self {
            params: Mutex::new(params),
            outcomes,
            interval_tx,
        }
    }

    /// Fetches once and returns the outcome to the caller instead of sending it.
    pub async fn fetch_once(&self) -> FetchOutcome {
        let params = self.params.lock().await;
        fetch(&params).await
    }

    /// Polls until `cancel` fires or the receiving side goes away.
    ///
    /// Fetches immediately, then once per poll interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval_rx = self.interval_tx.subscribe();
        let period = *interval_rx.borrow_and_update();
        let mut ticker = new_ticker(period);
        debug!(?period, "secret watcher started");

        if self.poll(&cancel).await {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Ok(()) = interval_rx.changed() => {
                        let period = *interval_rx.borrow_and_update();
                        debug!(?period, "poll interval reset");
                        ticker = new_ticker(period);
                    }
                    _ = ticker.tick() => {
                        if !self.poll(&cancel).await {
                            break;
                        }
                    }
                }
            }
        }

        drop(ticker);
        debug!("secret watcher stopped");
    }

    /// Replaces the watch parameters and restarts the timer with the new interval.
    ///
    /// Waits for an in-flight fetch to be delivered first; that fetch keeps the
    /// parameters it started with.
    pub async fn update_parameters(&self, params: WatchParameters) {
        let poll_interval = params.poll_interval;
        let mut current = self.params.lock().await;
        *current = params;
        self.interval_tx.send_replace(poll_interval);
    }

    /// Fetches and delivers one outcome. Returns `false` when polling should stop.
    async fn poll(&self, cancel: &CancellationToken) -> bool {
        let params = self.params.lock().await;
        let outcome = fetch(&params).await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("cancelled with an undelivered outcome");
                false
            }
            sent = self.outcomes.send(outcome) => {
                if sent.is_err() {
                    debug!("outcome receiver closed");
                }
                sent.is_ok()
            }
        }
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn fetch(params: &WatchParameters) -> FetchOutcome {
    debug!(
        secret_id = %params.secret_id,
        version_stage = %params.version_stage,
        "fetching secret"
    );
    let raw = params
        .store
        .get_secret_value(&params.secret_id, &params.version_stage)
        .await?;
    match (raw.secret_string, raw.secret_binary) {
        (Some(text), _) => parse_secret_document(&text),
        (None, Some(_)) => Err(FetchError::BinaryUnsupported),
        (None, None) => parse_secret_document(""),
    }
}
