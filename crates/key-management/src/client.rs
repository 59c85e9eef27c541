use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use shared::error::{CommonError, ErrorResponse};
use tracing::debug;
use url::Url;

use crate::logic::data_key::DataKey;
use crate::logic::encryption_key::EncryptionKey;
use crate::logic::storage::CreateKeyRequest;
use crate::router::{API_PATH_PREFIX, DATA_KEY_PATH, ENCRYPTION_KEY_PATH};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The peer coordinator's key storage API as seen by the initiator.
#[async_trait::async_trait]
pub trait KeyStorageClient: Send + Sync {
    async fn create_key(&self, request: CreateKeyRequest) -> Result<EncryptionKey, CommonError>;

    async fn get_data_key(&self) -> Result<DataKey, CommonError>;
}

/// HTTP client for a peer's key storage service.
#[derive(Clone)]
pub struct HttpKeyStorageClient {
    inner: reqwest::Client,
    base_url: Url,
    data_key_base_url: Url,
    request_timeout: Duration,
}

impl HttpKeyStorageClient {
    /// `data_key_base_url` overrides where data keys are fetched from, for
    /// deployments that serve them from a separate endpoint.
    pub fn new(base_url: Url, data_key_base_url: Option<Url>) -> Result<Self, CommonError> {
        let inner = reqwest::Client::builder()
            .user_agent(format!(
                "{}/{} {}-{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
            ))
            .build()?;

        Ok(Self {
            inner,
            data_key_base_url: data_key_base_url.unwrap_or_else(|| base_url.clone()),
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn api_url(base_url: &Url, path: &str) -> Result<Url, CommonError> {
        let mut url = base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CommonError::invalid_argument(format!("{base_url} cannot be used as a base url"))
            })?;
            segments.pop_if_empty();
            segments.extend(API_PATH_PREFIX.split('/').filter(|s| !s.is_empty()));
            segments.push(path);
        }
        Ok(url)
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, CommonError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let response = self
            .inner
            .post(url.clone())
            .timeout(self.request_timeout)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!("Response from {} ({})", url, status);
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        let peer_error = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error_response) => CommonError::from_error_response(error_response),
            Err(_) => CommonError::internal(format!("{status}: {body}")),
        };
        Err(CommonError::invalid_argument_with_source(
            format!("peer coordinator rejected request to {url} with {status}"),
            peer_error,
        ))
    }
}

#[async_trait::async_trait]
impl KeyStorageClient for HttpKeyStorageClient {
    async fn create_key(&self, request: CreateKeyRequest) -> Result<EncryptionKey, CommonError> {
        let url = Self::api_url(&self.base_url, ENCRYPTION_KEY_PATH)?;
        self.post_json(url, &request).await
    }

    async fn get_data_key(&self) -> Result<DataKey, CommonError> {
        let url = Self::api_url(&self.data_key_base_url, DATA_KEY_PATH)?;
        self.post_json(url, &serde_json::json!({})).await
    }
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;

    #[test]
    fn test_api_url_joins_prefix() {
        let base = Url::parse("https://peer.example.com").unwrap();
        let url = HttpKeyStorageClient::api_url(&base, ENCRYPTION_KEY_PATH).unwrap();
        assert_eq!(
            url.as_str(),
            "https://peer.example.com/api/key-storage/v1/encryption-key"
        );

        let base = Url::parse("https://peer.example.com/coordinator-b/").unwrap();
        let url = HttpKeyStorageClient::api_url(&base, DATA_KEY_PATH).unwrap();
        assert_eq!(
            url.as_str(),
            "https://peer.example.com/coordinator-b/api/key-storage/v1/data-key"
        );
    }

    #[test]
    fn test_data_key_override() {
        let base = Url::parse("https://peer.example.com").unwrap();
        let data_keys = Url::parse("https://keys.example.com").unwrap();
        let client = HttpKeyStorageClient::new(base, Some(data_keys)).unwrap();
        assert_eq!(client.data_key_base_url.as_str(), "https://keys.example.com/");
        assert_eq!(client.base_url.as_str(), "https://peer.example.com/");
        assert_eq!(client.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_rejects_non_hierarchical_base_url() {
        let base = Url::parse("mailto:peer@example.com").unwrap();
        assert!(HttpKeyStorageClient::api_url(&base, DATA_KEY_PATH).is_err());
    }
}
