//! Client for the hosted model's scoring endpoint.

use crate::forecast::FeatureRecord;
use crate::secrets::{SecretError, SecretStore};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Client creation error: {0}")]
    ClientCreation(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Scoring endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid scoring response: {0}")]
    Decode(String),
    #[error("Scoring response contained no predictions")]
    EmptyPredictions,
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Produces one prediction for one feature record.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, record: &FeatureRecord) -> Result<f64, ScoringError>;
}

#[derive(Debug, Serialize)]
struct ScoringRequest<'a> {
    dataframe_records: [&'a FeatureRecord; 1],
}

#[derive(Debug, Deserialize)]
struct ScoringResponse {
    predictions: Vec<f64>,
}

/// POSTs `{"dataframe_records": [record]}` and reads `predictions[0]`.
#[derive(Clone)]
pub struct ScoringClient {
    client: Client,
    url: String,
    token: Option<TokenSecret>,
}

/// Bearer token looked up by name on every request.
#[derive(Clone)]
struct TokenSecret {
    store: Arc<dyn SecretStore>,
    name: String,
}

impl fmt::Debug for ScoringClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringClient")
            .field("url", &self.url)
            .field("token_secret", &self.token.as_ref().map(|t| &t.name))
            .finish()
    }
}

impl ScoringClient {
    /// `timeout` of `None` keeps the HTTP client's defaults.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ScoringError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ScoringError::ClientCreation(e.to_string()))?;
        Ok(ScoringClient {
            client,
            url: url.into(),
            token: None,
        })
    }

    /// Sends the secret `name` as a bearer credential, resolving it from
    /// `store` for each request.
    pub fn with_token_secret(
        mut self,
        store: Arc<dyn SecretStore>,
        name: impl Into<String>,
    ) -> Self {
        self.token = Some(TokenSecret {
            store,
            name: name.into(),
        });
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Scorer for ScoringClient {
    async fn score(&self, record: &FeatureRecord) -> Result<f64, ScoringError> {
        let mut request = self.client.post(&self.url).json(&ScoringRequest {
            dataframe_records: [record],
        });
        if let Some(token) = &self.token {
            let secret = token.store.get(&token.name)?;
            request = request.bearer_auth(secret.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScoringError::Network(e.without_url().to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ScoringResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Decode(e.without_url().to_string()))?;
        let prediction = parsed
            .predictions
            .first()
            .copied()
            .ok_or(ScoringError::EmptyPredictions)?;
        debug!(prediction, "scored feature record");
        Ok(prediction)
    }
}
