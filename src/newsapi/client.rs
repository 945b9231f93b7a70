//! `reqwest` client for the News API v2.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{NewsApiError, NewsApiResult};
use super::types::{ApiErrorBody, ArticlesResponse, EverythingQuery, TopHeadlinesQuery};
use super::NewsSource;
use crate::config::NewsApiConfig;

/// Header carrying the credential on every request.
const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP client for the News API.
///
/// The credential is resolved once, from the environment variable named in
/// the configuration. A missing credential does not prevent construction;
/// each call then fails with [`NewsApiError::MissingApiKey`].
pub struct NewsApiClient {
    http: Client,
    base_url: String,
    api_key_env: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for NewsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiClient")
            .field("base_url", &self.base_url)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl NewsApiClient {
    /// Creates a client from configuration, reading the key from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn from_config(config: &NewsApiConfig) -> NewsApiResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(config, api_key)
    }

    /// Creates a client with an explicit key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &NewsApiConfig, api_key: Option<String>) -> NewsApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("newsapi-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            api_key,
        })
    }

    /// Returns `true` if a credential is available.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> NewsApiResult<HeaderValue> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| NewsApiError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            })?;
        let mut value =
            HeaderValue::from_str(key).map_err(|_| NewsApiError::InvalidApiKey {
                env_var: self.api_key_env.clone(),
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Issues `GET {base_url}/{endpoint}` and decodes the response.
    async fn get<Q, T>(&self, endpoint: &str, query: &Q) -> NewsApiResult<T>
    where
        Q: Serialize + Sync,
        T: DeserializeOwned,
    {
        let api_key = self.api_key()?;
        let url = format!("{}/{endpoint}", self.base_url);

        tracing::debug!(endpoint, "Calling News API");

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::OK {
            return serde_json::from_slice(&body).map_err(|e| NewsApiError::UnexpectedResponse {
                status: status.as_u16(),
                message: e.to_string(),
            });
        }

        let error = serde_json::from_slice::<ApiErrorBody>(&body).map_err(|e| {
            NewsApiError::UnexpectedResponse {
                status: status.as_u16(),
                message: e.to_string(),
            }
        })?;

        tracing::warn!(
            endpoint,
            status = status.as_u16(),
            code = error.code.as_deref().unwrap_or("unknown"),
            "News API returned an error"
        );

        Err(NewsApiError::Api {
            status: status.as_u16(),
            code: error.code.unwrap_or_else(|| "unknown".to_string()),
            message: error
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        })
    }
}

#[async_trait]
impl NewsSource for NewsApiClient {
    async fn everything(&self, query: &EverythingQuery) -> NewsApiResult<ArticlesResponse> {
        self.get("everything", query).await
    }

    async fn top_headlines(&self, query: &TopHeadlinesQuery) -> NewsApiResult<ArticlesResponse> {
        self.get("top-headlines", query).await
    }
}
