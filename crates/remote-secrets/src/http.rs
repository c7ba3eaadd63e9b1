//! HTTP transport handed to the AWS SDK.
//!
//! The SDK signs and serialises requests; this module only moves bytes over
//! `reqwest`, which lets `disable_tls_verification` reach every connection the
//! SDK opens, credential providers included.

use std::time::Duration;

use aws_smithy_runtime_api::client::http::{
    HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings, SharedHttpConnector,
};
use aws_smithy_runtime_api::client::orchestrator::{HttpRequest, HttpResponse};
use aws_smithy_runtime_api::client::result::ConnectorError;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::body::SdkBody;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::debug;

use crate::error::ConfigError;

/// Upper bound for one store round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// SDK HTTP client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(disable_tls_verification: bool) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(disable_tls_verification)
            .danger_accept_invalid_hostnames(disable_tls_verification)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn http_connector(
        &self,
        _settings: &HttpConnectorSettings,
        _components: &RuntimeComponents,
    ) -> SharedHttpConnector {
        SharedHttpConnector::new(self.clone())
    }
}

impl HttpConnector for ReqwestHttpClient {
    fn call(&self, request: HttpRequest) -> HttpConnectorFuture {
        let client = self.client.clone();
        HttpConnectorFuture::new(async move { send(&client, request).await })
    }
}

async fn send(client: &Client, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
    let method = Method::from_bytes(request.method().as_bytes()).map_err(user_error)?;

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers().iter() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(user_error)?;
        headers.append(name, HeaderValue::from_str(value).map_err(user_error)?);
    }

    let body = request
        .body()
        .bytes()
        .ok_or_else(|| ConnectorError::user("streaming request bodies are not supported".into()))?
        .to_vec();

    debug!(
        %method,
        url = request.uri(),
        headers = ?redact_headers(&headers),
        "secret store request"
    );

    let response = client
        .request(method, request.uri())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(connector_error)?;

    let status = response.status().as_u16();
    let response_headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(connector_error)?;
    debug!(status, len = bytes.len(), "secret store response");

    let status =
        StatusCode::try_from(status).map_err(|err| ConnectorError::other(err.into(), None))?;
    let mut converted = HttpResponse::new(status, SdkBody::from(bytes));
    for (name, value) in response_headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if let Err(err) = converted
            .headers_mut()
            .try_append(name.as_str().to_string(), value.to_string())
        {
            debug!(header = name.as_str(), %err, "dropping unrepresentable response header");
        }
    }
    Ok(converted)
}

fn user_error<E>(err: E) -> ConnectorError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ConnectorError::user(Box::new(err))
}

fn connector_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::timeout(err.into())
    } else {
        ConnectorError::io(err.into())
    }
}

/// Returns a redacted view of request headers suitable for debug logging.
fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    const SENSITIVE_HEADERS: [&str; 2] = ["authorization", "x-amz-security-token"];

    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            let display = if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                "<redacted>".to_string()
            } else {
                value
                    .to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (lower, display)
        })
        .collect()
}
