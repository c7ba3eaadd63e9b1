//! Error taxonomy for the secret watcher.
//!
//! Configuration problems are surfaced synchronously to whoever constructs or
//! reconfigures a component. Fetch problems never escape the run loop; they are
//! folded into the component's health instead.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::MIN_POLL_INTERVAL;

/// Invalid construction or reconfiguration input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("secret_id must not be empty")]
    MissingSecretId,

    #[error("poll_interval must be greater than {}, got {}", human(&MIN_POLL_INTERVAL), human(.0))]
    PollIntervalTooShort(Duration),

    #[error("if access_key or secret are specified then the other must also be specified")]
    IncompleteCredentials,

    #[error("no region configured and no endpoint override supplied")]
    MissingRegion,

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("failed to build store client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to read configuration file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration file {}: {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Failure reported by a [`crate::store::SecretStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered with an error document.
    #[error("{code}: {message} (status {status})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a service answer: credentials, signing,
    /// DNS, TLS, socket, timeout or an undecodable response.
    #[error("secret store request failed: {0}")]
    Transport(String),

    /// Catch-all for store implementations outside this crate.
    #[error("{0}")]
    Other(String),
}

/// Why a single fetch attempt produced no content.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("SecretBinary is not supported")]
    BinaryUnsupported,

    #[error("secret payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("secret payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}
