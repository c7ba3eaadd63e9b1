//! Secrets Manager store built on the AWS SDK.
//!
//! Region, credentials and endpoint come from the SDK default chain, with
//! [`StoreOptions`] applied on top of it.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::config::http::HttpResponse;
use aws_sdk_secretsmanager::config::{Credentials, Region};
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use aws_sdk_secretsmanager::Client;
use reqwest::Url;
use tracing::debug;

use crate::config::StoreOptions;
use crate::error::{ConfigError, StoreError};
use crate::http::ReqwestHttpClient;
use crate::store::{RawSecret, SecretStore};

/// Region signed with when a custom endpoint is used and no region is known.
const FALLBACK_SIGNING_REGION: &str = "us-east-1";
const CREDENTIALS_PROVIDER: &str = "SecretsWatchStaticCredentials";

/// Store client backed by `aws_sdk_secretsmanager`.
#[derive(Clone)]
pub struct AwsSecretStore {
    client: Client,
}

impl fmt::Debug for AwsSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSecretStore")
            .field("region", &self.region())
            .finish()
    }
}

impl AwsSecretStore {
    /// Loads the SDK default chain and applies `options` on top of it.
    ///
    /// With a custom endpoint, `signing_region` replaces the client region,
    /// which the SDK only uses for signing once the endpoint is fixed.
    pub async fn from_options(options: &StoreOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let endpoint = options.endpoint.as_deref().map(parse_endpoint).transpose()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .http_client(ReqwestHttpClient::new(options.disable_tls_verification)?);
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        if let (Some(access_key), Some(secret)) = (&options.access_key, &options.secret) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret.expose().to_string(),
                None,
                None,
                CREDENTIALS_PROVIDER,
            ));
        }
        let shared = loader.load().await;

        let region = match (&endpoint, &options.signing_region, shared.region()) {
            (Some(_), Some(signing_region), _) => Region::new(signing_region.clone()),
            (_, _, Some(region)) => region.clone(),
            (Some(_), None, None) => Region::new(FALLBACK_SIGNING_REGION),
            (None, _, None) => return Err(ConfigError::MissingRegion),
        };
        debug!(
            region = %region,
            endpoint = endpoint.as_deref().unwrap_or("default"),
            static_credentials = options.access_key.is_some(),
            "built secret store client"
        );

        let config = aws_sdk_secretsmanager::config::Builder::from(&shared)
            .region(region)
            .build();
        Ok(Self::from_client(Client::from_conf(config)))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Region the client signs requests for.
    pub fn region(&self) -> Option<&str> {
        self.client.config().region().map(|region| region.as_ref())
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<RawSecret, StoreError> {
        let version_stage = Some(version_stage)
            .filter(|stage| !stage.is_empty())
            .map(str::to_string);
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .set_version_stage(version_stage)
            .send()
            .await
            .map_err(store_error)?;

        debug!(
            name = ?output.name(),
            version_id = ?output.version_id(),
            has_string = output.secret_string().is_some(),
            has_binary = output.secret_binary().is_some(),
            "secret store response"
        );

        Ok(RawSecret {
            name: output.name().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            secret_string: output.secret_string().map(str::to_string),
            secret_binary: output.secret_binary().map(|blob| blob.as_ref().to_vec()),
        })
    }
}

/// Service answers keep their error code; everything else is a transport failure.
fn store_error(err: SdkError<GetSecretValueError, HttpResponse>) -> StoreError {
    match err {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let err = service.err();
            StoreError::Api {
                status,
                code: err.code().unwrap_or("UnknownError").to_string(),
                message: err.message().unwrap_or_default().to_string(),
            }
        }
        other => StoreError::Transport(DisplayErrorContext(&other).to_string()),
    }
}

fn parse_endpoint(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}
