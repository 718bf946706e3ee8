use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::ApiConfig;

/// A quote as returned by the quote API. Missing fields fall back to
/// placeholder text instead of failing the whole response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Quote {
    #[serde(default = "default_content", deserialize_with = "or_content")]
    pub content: String,
    #[serde(default = "default_author", deserialize_with = "or_author")]
    pub author: String,
}

fn default_content() -> String {
    "N/A".to_string()
}

fn default_author() -> String {
    "Unknown".to_string()
}

fn or_content<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_content))
}

fn or_author<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_author))
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("quote API returned status {0}")]
    Status(u16),

    #[error("could not reach quote API: {0}")]
    Connection(#[source] reqwest::Error),

    /// The response was not labelled as JSON.
    #[error("quote API sent content type {0:?}, expected application/json")]
    ContentType(String),

    #[error("unexpected quote API failure: {0}")]
    Unexpected(String),
}

/// Anything that can produce a quote on demand.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self) -> Result<Quote, FetchError>;
}

pub struct QuoteClient {
    client: reqwest::Client,
    endpoint: String,
}

impl QuoteClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn fetch(&self) -> Result<Quote, FetchError> {
        debug!("Requesting quote from {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(FetchError::Connection)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_json(&content_type) {
            return Err(FetchError::ContentType(content_type));
        }

        let body = response.bytes().await.map_err(FetchError::Connection)?;
        serde_json::from_slice(&body)
            .map_err(|e| FetchError::Unexpected(format!("invalid response body: {e}")))
    }
}

/// `application/json`, optionally with parameters such as `charset`.
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
