//! Public entry points for the remote-secrets crate.
//!
//! A [`Component`] polls one secret from a Secrets Manager compatible store,
//! republishes its string fields as [`Exports`] through an [`ExportSink`], and
//! reports its [`Health`]. Hosts can reconfigure it at any time with
//! [`Component::update`] without restarting the poll loop.

pub mod aws;
pub mod component;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod secret;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use aws::AwsSecretStore;
pub use component::{Component, ComponentOptions, ExportSink, Exports, SECRETS_RETRIEVED};
pub use config::{
    parse_duration, Arguments, ArgumentsSource, StoreOptions, DEFAULT_POLL_INTERVAL,
    DEFAULT_VERSION_STAGE, ENV_CONFIG_FILE, MIN_POLL_INTERVAL,
};
pub use error::{ConfigError, FetchError, StoreError};
pub use health::{Health, HealthType};
pub use http::ReqwestHttpClient;
pub use secret::{parse_secret_document, Secret, SecretContent, SecretValue};
pub use store::{AwsStoreFactory, RawSecret, SecretStore, StoreFactory, StoreHandle};
pub use watcher::{FetchOutcome, WatchParameters, Watcher};
