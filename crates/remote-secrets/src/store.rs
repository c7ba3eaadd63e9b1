//! Secret store abstraction.
//!
//! The watcher only needs one capability from a store: fetch a secret by id
//! and version stage. [`StoreFactory`] turns [`StoreOptions`] into a ready
//! handle so the component can rebuild its client on reconfiguration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::aws::AwsSecretStore;
use crate::config::StoreOptions;
use crate::error::{ConfigError, StoreError};

/// Raw `GetSecretValue` result as returned by the store.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RawSecret {
    pub name: Option<String>,
    pub version_id: Option<String>,
    pub secret_string: Option<String>,
    pub secret_binary: Option<Vec<u8>>,
}

impl fmt::Debug for RawSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSecret")
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .field("secret_string", &self.secret_string.as_ref().map(|_| "<redacted>"))
            .field(
                "secret_binary",
                &self.secret_binary.as_ref().map(|b| format!("<{} bytes>", b.len())),
            )
            .finish()
    }
}

/// Capability to fetch one secret revision.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<RawSecret, StoreError>;
}

/// Shared handle to a store client.
pub type StoreHandle = Arc<dyn SecretStore>;

/// Builds store handles from validated options.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn build(&self, options: &StoreOptions) -> Result<StoreHandle, ConfigError>;
}

/// Default factory producing [`AwsSecretStore`] clients.
///
/// Every build reloads the SDK default chain, so a reconfiguration also picks
/// up rotated profile or environment settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsStoreFactory;

#[async_trait]
impl StoreFactory for AwsStoreFactory {
    async fn build(&self, options: &StoreOptions) -> Result<StoreHandle, ConfigError> {
        Ok(Arc::new(AwsSecretStore::from_options(options).await?))
    }
}
