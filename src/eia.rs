use crate::demand::{DateRange, DemandRecord, RESPONDENT};
use crate::retry::{retry, Backoff, RetryPolicy};
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Region-data route of the EIA v2 API.
pub const DEFAULT_BASE_URL: &str = "https://api.eia.gov/v2/electricity/rto/region-data/data/";

/// Upper bound on rows per request. There is no pagination past it.
pub const MAX_PAGE_LENGTH: usize = 5000;

/// Configuration for the EIA client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint the query string is appended to
    pub base_url: String,
    /// Maximum number of attempts per request (default: 3)
    pub max_attempts: u32,
    /// Backoff unit; the n-th retry waits `n * backoff` (default: 5s)
    pub backoff: Duration,
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Rows requested per call, capped at [`MAX_PAGE_LENGTH`]
    pub page_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            timeout_seconds: 30,
            page_length: MAX_PAGE_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff, Backoff::Linear)
    }
}

/// Errors that can occur while fetching demand data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP client creation failed
    #[error("Client creation error: {0}")]
    ClientCreation(String),
    /// Connection, timeout or body read failure
    #[error("Network error: {0}")]
    Network(String),
    /// Non-2xx response
    #[error("API error: HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    /// Body was not the expected JSON shape
    #[error("Parse error: {0}")]
    Decode(String),
    /// Every attempt failed
    #[error("Failed to fetch {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("Invalid date range: {start} > {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

impl FetchError {
    /// Transport failure without the request URL, which carries the API key.
    fn network(err: reqwest::Error) -> Self {
        FetchError::Network(redact_api_key(&err.without_url().to_string()))
    }

    /// Transport and status failures are retried; decode failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Status { .. })
    }
}

#[derive(Debug, Deserialize)]
struct EiaEnvelope {
    response: EiaResponse,
}

#[derive(Debug, Deserialize)]
struct EiaResponse {
    data: Vec<DemandRecord>,
}

/// Builds the region-data query for `NYIS` over an inclusive date range.
///
/// Newest periods come first; a single page of up to [`MAX_PAGE_LENGTH`] rows.
pub fn build_eia_url(api_key: &str, start: NaiveDate, end: NaiveDate) -> String {
    build_url(DEFAULT_BASE_URL, api_key, start, end, MAX_PAGE_LENGTH)
}

fn build_url(base: &str, api_key: &str, start: NaiveDate, end: NaiveDate, length: usize) -> String {
    format!(
        "{}?api_key={}&frequency=hourly\
         &data[0]=value\
         &facets[respondent][]={}\
         &sort[0][column]=period&sort[0][direction]=desc\
         &start={}&end={}&offset=0&length={}",
        base,
        api_key,
        RESPONDENT,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        length.min(MAX_PAGE_LENGTH),
    )
}

/// Replaces the `api_key` query value so URLs can be logged.
pub fn redact_api_key(url: &str) -> String {
    match url.find("api_key=") {
        Some(pos) => {
            let value_start = pos + "api_key=".len();
            let value_end = url[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}

/// Client for the hourly demand endpoint.
#[derive(Debug, Clone)]
pub struct EiaClient {
    client: Client,
    config: ClientConfig,
}

impl EiaClient {
    /// Creates a client with default configuration.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a client with custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::ClientCreation(e.to_string()))?;

        Ok(EiaClient { client, config })
    }

    /// URL for `range` against the configured endpoint.
    pub fn request_url(&self, api_key: &SecretString, range: &DateRange) -> String {
        build_url(
            &self.config.base_url,
            api_key.expose_secret(),
            range.start,
            range.end,
            self.config.page_length,
        )
    }

    /// GETs `url`, retrying transport and status failures with linear backoff.
    ///
    /// # Errors
    /// `FetchError::RetriesExhausted` once every attempt failed, or
    /// `FetchError::Decode` immediately when the body is not valid JSON.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let redacted = redact_api_key(url);
        let policy = self.config.retry_policy();

        retry(&policy, &redacted, FetchError::is_transient, |attempt| {
            let redacted = redacted.clone();
            async move {
                debug!(url = %redacted, attempt, "GET");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(FetchError::network)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        reason: status.canonical_reason().unwrap_or("Unknown error").to_string(),
                    });
                }

                let body = response
                    .bytes()
                    .await
                    .map_err(FetchError::network)?;
                serde_json::from_slice::<serde_json::Value>(&body)
                    .map_err(|e| FetchError::Decode(e.to_string()))
            }
        })
        .await
        .map_err(|err| {
            if err.last_error.is_transient() {
                FetchError::RetriesExhausted {
                    url: redacted.clone(),
                    attempts: err.attempts,
                    last: Box::new(err.last_error),
                }
            } else {
                err.last_error
            }
        })
    }

    /// Fetches hourly demand for `range` and returns the rows as delivered
    /// (newest first).
    ///
    /// A body without `response.data` fails with `FetchError::Decode`.
    pub async fn fetch_demand(
        &self,
        api_key: &SecretString,
        range: &DateRange,
    ) -> Result<Vec<DemandRecord>, FetchError> {
        if !range.is_valid() {
            return Err(FetchError::InvalidDateRange {
                start: range.start,
                end: range.end,
            });
        }

        let url = self.request_url(api_key, range);
        let body = self.get_json(&url).await?;
        let envelope: EiaEnvelope =
            serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))?;

        info!(
            start = %range.start,
            end = %range.end,
            rows = envelope.response.data.len(),
            "fetched demand rows"
        );
        Ok(envelope.response.data)
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
