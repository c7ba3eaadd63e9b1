//! Component arguments and environment-driven helpers.
//!
//! [`Arguments`] is what the host hands to [`crate::Component::new`] and
//! [`crate::Component::update`]. It can be deserialised from a JSON file, built
//! from the process environment, or filled in by hand; in every case
//! [`Arguments::validate`] runs before a store client is built from it.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::secret::Secret;

/// Poll intervals at or below this value are rejected.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Version stage fetched when none is configured.
pub const DEFAULT_VERSION_STAGE: &str = "AWSCURRENT";

const ENV_SECRET_ID: &str = "SECRETS_WATCH_SECRET_ID";
const ENV_VERSION_STAGE: &str = "SECRETS_WATCH_VERSION_STAGE";
const ENV_POLL_INTERVAL: &str = "SECRETS_WATCH_POLL_INTERVAL";
const ENV_ENDPOINT: &str = "SECRETS_WATCH_ENDPOINT";
const ENV_DISABLE_TLS_VERIFICATION: &str = "SECRETS_WATCH_DISABLE_TLS_VERIFICATION";
const ENV_ACCESS_KEY: &str = "SECRETS_WATCH_ACCESS_KEY";
const ENV_SECRET: &str = "SECRETS_WATCH_SECRET";
const ENV_REGION: &str = "SECRETS_WATCH_REGION";
const ENV_SIGNING_REGION: &str = "SECRETS_WATCH_SIGNING_REGION";
/// Path of a JSON [`Arguments`] document; when set it replaces the variables above.
pub const ENV_CONFIG_FILE: &str = "SECRETS_WATCH_CONFIG";

/// Input of a secret watcher component.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Arguments {
    /// Name or ARN of the secret to watch.
    pub secret_id: String,
    /// Version stage to fetch (e.g. `AWSCURRENT`, `AWSPREVIOUS`).
    pub version_stage: String,
    /// How often the secret is re-fetched.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Overrides for the store client.
    pub client: StoreOptions,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            secret_id: String::new(),
            version_stage: DEFAULT_VERSION_STAGE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            client: StoreOptions::default(),
        }
    }
}

/// Store client overrides.
///
/// Unset fields fall back to the AWS SDK default chain: `AWS_*` variables,
/// shared config and credential files, then container and instance metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Custom endpoint URL (e.g. a local emulator).
    pub endpoint: Option<String>,
    /// Skips TLS certificate and hostname verification.
    pub disable_tls_verification: bool,
    /// Static access key id; requires `secret`.
    pub access_key: Option<String>,
    /// Static secret access key; requires `access_key`.
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: Option<Secret>,
    pub region: Option<String>,
    /// Region used for request signing when it differs from `region`.
    pub signing_region: Option<String>,
}

impl StoreOptions {
    /// Checks that the credential overrides are either both set or both unset.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.access_key, &self.secret) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::IncompleteCredentials),
            _ => Ok(()),
        }
    }
}

impl Arguments {
    pub fn new(secret_id: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            ..Self::default()
        }
    }

    /// Validates the arguments the same way a host's config layer would.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_id.trim().is_empty() {
            return Err(ConfigError::MissingSecretId);
        }
        if self.poll_interval <= MIN_POLL_INTERVAL {
            return Err(ConfigError::PollIntervalTooShort(self.poll_interval));
        }
        self.client.validate()
    }

    /// Builds arguments from the current process environment.
    pub fn from_os_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds arguments from key/value pairs (typically for tests).
    ///
    /// The result is not validated; call [`Arguments::validate`] or hand it to
    /// the component, which does.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = collect_env(iter);
        let get = |key: &str| map.get(key).and_then(|value| sanitize_non_empty(value));

        let poll_interval = match get(ENV_POLL_INTERVAL) {
            Some(value) => parse_duration(&value)?,
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            secret_id: get(ENV_SECRET_ID).unwrap_or_default(),
            version_stage: get(ENV_VERSION_STAGE)
                .unwrap_or_else(|| DEFAULT_VERSION_STAGE.to_string()),
            poll_interval,
            client: StoreOptions {
                endpoint: get(ENV_ENDPOINT),
                disable_tls_verification: parse_bool(
                    map.get(ENV_DISABLE_TLS_VERIFICATION).map(String::as_str),
                    false,
                ),
                access_key: get(ENV_ACCESS_KEY),
                secret: get(ENV_SECRET).map(Secret::from),
                region: get(ENV_REGION),
                signing_region: get(ENV_SIGNING_REGION),
            },
        })
    }

    /// Reads arguments from a JSON document on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where a host reads its [`Arguments`] from, both at startup and on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentsSource {
    /// The `SECRETS_WATCH_*` variables captured when the source was created.
    Env(Vec<(String, String)>),
    /// A JSON document re-read on every [`ArgumentsSource::load`].
    File(PathBuf),
}

impl ArgumentsSource {
    /// Picks the file named by `SECRETS_WATCH_CONFIG`, or the process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Vec<(String, String)> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let file = vars
            .iter()
            .find(|(key, _)| key == ENV_CONFIG_FILE)
            .and_then(|(_, value)| sanitize_non_empty(value));
        match file {
            Some(path) => Self::File(PathBuf::from(path)),
            None => Self::Env(vars),
        }
    }

    /// Whether a later [`ArgumentsSource::load`] can observe new values.
    ///
    /// A process cannot see changes to its own environment made from outside,
    /// so only file sources are reloadable.
    pub fn is_reloadable(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn load(&self) -> Result<Arguments, ConfigError> {
        match self {
            Self::Env(vars) => Arguments::from_env_iter(vars.iter().cloned()),
            Self::File(path) => Arguments::from_file(path),
        }
    }
}

fn collect_env<I, K, V>(iter: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    iter.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Parses a human-readable duration such as `10m` or `1h 30m`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|err| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<Secret>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(Secret::from))
}
