//! GraphQL client for the Polymarket activity subgraph.
//!
//! One fixed endpoint, POST `{"query": ...}`. Gateway failures (502/503/504)
//! and network errors are retried with exponential backoff plus jitter;
//! any other non-200 status is fatal straight away. A 200 response that
//! carries a top-level `errors` array is not an error at this layer: it is
//! handed back as [`QueryOutcome::Errors`] so the caller can log it and
//! stop paging.
//!
//! HTTP and sleeping go through [`Transport`] and [`Sleeper`] so the retry
//! schedule can be driven without a network or a clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest slice of a response body kept in an error.
const MAX_ERROR_BODY: usize = 500;

/// Backoff stops doubling past `2^MAX_BACKOFF_EXP` seconds (about 18 hours).
pub const MAX_BACKOFF_EXP: u32 = 16;

#[derive(Error, Debug)]
pub enum SubgraphError {
    #[error("subgraph returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("subgraph unavailable after {attempts} attempts (last failure: {last})")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("failed to decode subgraph response: {0}")]
    Decode(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Network-level failure (connect, timeout, reset...).
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError>;
}

#[allow(async_fn_in_trait)]
pub trait Sleeper {
    async fn sleep(&self, duration: Duration);
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SubgraphError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubgraphError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Real wall-clock pauses.
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<serde_json::Value>>,
}

/// Result of a query that reached the server and got a 200 back.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Data(serde_json::Value),
    /// The server rejected the query in-band (`errors` field).
    Errors(Vec<serde_json::Value>),
}

pub struct SubgraphClient<T, S> {
    url: String,
    max_attempts: u32,
    transport: T,
    sleeper: S,
}

impl SubgraphClient<HttpTransport, TokioSleeper> {
    pub fn connect(url: &str, max_attempts: u32, timeout: Duration) -> Result<Self, SubgraphError> {
        Ok(Self::new(url, max_attempts, HttpTransport::new(timeout)?, TokioSleeper))
    }
}

impl<T: Transport, S: Sleeper> SubgraphClient<T, S> {
    pub fn new(url: &str, max_attempts: u32, transport: T, sleeper: S) -> Self {
        Self {
            url: url.to_string(),
            max_attempts: max_attempts.max(1),
            transport,
            sleeper,
        }
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Run one GraphQL document against the endpoint.
    pub async fn query(&self, document: &str) -> Result<QueryOutcome, SubgraphError> {
        let payload = serde_json::to_value(GraphQLRequest { query: document })
            .map_err(|e| SubgraphError::Decode(e.to_string()))?;
        let mut last_failure = String::new();

        for attempt in 0..self.max_attempts {
            match self.transport.post_json(&self.url, &payload).await {
                Ok(resp) if resp.status == 200 => {
                    debug!(attempt, bytes = resp.body.len(), "subgraph query ok");
                    return decode(&resp.body);
                }
                Ok(resp) if is_transient(resp.status) => {
                    last_failure = format!("HTTP {}", resp.status);
                }
                Ok(resp) => {
                    return Err(SubgraphError::Status {
                        status: resp.status,
                        body: truncate(&resp.body),
                    });
                }
                Err(e) => {
                    last_failure = e.to_string();
                }
            }

            if attempt + 1 < self.max_attempts {
                let delay = backoff_delay(attempt, rand::random::<f64>());
                warn!(
                    attempt = attempt + 1,
                    max_attempts = self.max_attempts,
                    failure = %last_failure,
                    delay_ms = delay.as_millis() as u64,
                    "subgraph request failed, retrying"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        Err(SubgraphError::RetriesExhausted {
            attempts: self.max_attempts,
            last: last_failure,
        })
    }
}

fn is_transient(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

/// `2^attempt` seconds plus `jitter`, with the exponent capped at
/// [`MAX_BACKOFF_EXP`]. `jitter` is a uniform draw from `[0, 1)`.
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    let base = 2f64.powi(attempt.min(MAX_BACKOFF_EXP) as i32);
    Duration::from_secs_f64(base + jitter)
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

fn decode(body: &str) -> Result<QueryOutcome, SubgraphError> {
    let resp: GraphQLResponse =
        serde_json::from_str(body).map_err(|e| SubgraphError::Decode(e.to_string()))?;
    if let Some(errors) = resp.errors {
        if !errors.is_empty() {
            return Ok(QueryOutcome::Errors(errors));
        }
    }
    resp.data
        .map(QueryOutcome::Data)
        .ok_or_else(|| SubgraphError::Decode("response has neither data nor errors".into()))
}
