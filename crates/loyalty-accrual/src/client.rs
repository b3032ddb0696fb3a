// Accrual service client
//
// One GET per poll: {endpoint}/api/orders/{number}. The response is classified
// into an AccrualQueryResult; transport problems (refused connection, timeout,
// undecodable body) are reported as AccrualClientError instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use loyalty_core::{OrderId, OrderStatus};

/// Pause used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Upper bound on an advertised `Retry-After`
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Order status as reported by the accrual service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccrualStatus {
    /// Known to the service, calculation not started
    Registered,
    /// Calculation in progress
    Processing,
    /// Rejected, no reward
    Invalid,
    /// Reward calculated
    Processed,
    /// Anything else the service may send
    Unknown(String),
}

impl AccrualStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Ledger status this maps to; `None` for statuses the ledger does not track
    pub fn order_status(&self) -> Option<OrderStatus> {
        match self {
            Self::Processing => Some(OrderStatus::Processing),
            Self::Invalid => Some(OrderStatus::Invalid),
            Self::Processed => Some(OrderStatus::Processed),
            Self::Registered | Self::Unknown(_) => None,
        }
    }
}

impl From<String> for AccrualStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "REGISTERED" => Self::Registered,
            "PROCESSING" => Self::Processing,
            "INVALID" => Self::Invalid,
            "PROCESSED" => Self::Processed,
            _ => Self::Unknown(s),
        }
    }
}

impl From<AccrualStatus> for String {
    fn from(status: AccrualStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a 200 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}

/// Classified answer of the accrual service
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualQueryResult {
    Found(AccrualResponse),
    /// 204: the service does not know the order
    NotRegistered,
    /// 429: slow down for `retry_after`
    RateLimited { retry_after: Duration },
    /// 5xx
    ServerError,
}

/// Failures below the HTTP contract
#[derive(Debug, thiserror::Error)]
pub enum AccrualClientError {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response status: {0}")]
    UnexpectedStatus(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for AccrualClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AccrualClientError::Timeout
        } else {
            AccrualClientError::Transport(err.to_string())
        }
    }
}

/// Source of accrual results, implemented by [`AccrualClient`] and test fakes
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn fetch(&self, order_id: &OrderId) -> Result<AccrualQueryResult, AccrualClientError>;
}

/// Accrual client configuration
#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    /// Base URL of the accrual service, e.g. `http://localhost:8081`
    pub endpoint: String,

    /// Whole-request timeout
    pub timeout: Duration,

    pub connect_timeout: Duration,

    /// Pause when a 429 carries no usable `Retry-After`
    pub default_retry_after: Duration,

    /// Longer advertised pauses are cut down to this
    pub max_retry_after: Duration,
}

impl AccrualClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            default_retry_after: DEFAULT_RETRY_AFTER,
            max_retry_after: MAX_RETRY_AFTER,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_default_retry_after(mut self, retry_after: Duration) -> Self {
        self.default_retry_after = retry_after;
        self
    }

    pub fn with_max_retry_after(mut self, retry_after: Duration) -> Self {
        self.max_retry_after = retry_after;
        self
    }
}

/// HTTP client for the accrual service
#[derive(Debug, Clone)]
pub struct AccrualClient {
    client: Client,
    config: AccrualClientConfig,
}

impl AccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self, AccrualClientError> {
        let endpoint = config.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(AccrualClientError::Config(format!(
                "endpoint must be an http(s) URL: {:?}",
                config.endpoint
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AccrualClientError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AccrualClientConfig {
        &self.config
    }

    fn order_url(&self, order_id: &OrderId) -> String {
        format!(
            "{}/api/orders/{}",
            self.config.endpoint.trim().trim_end_matches('/'),
            order_id
        )
    }

    fn retry_after(&self, response: &reqwest::Response) -> Duration {
        let advertised = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after)
            .unwrap_or(self.config.default_retry_after);

        if advertised > self.config.max_retry_after {
            warn!(
                advertised_secs = advertised.as_secs(),
                max_secs = self.config.max_retry_after.as_secs(),
                "Retry-After exceeds the limit, clamping"
            );
            return self.config.max_retry_after;
        }
        advertised
    }
}

/// Parse a delta-seconds `Retry-After`; zero and HTTP dates are not accepted
fn parse_retry_after(value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

#[async_trait]
impl AccrualSource for AccrualClient {
    #[instrument(skip(self, order_id), fields(order_id = %order_id))]
    async fn fetch(&self, order_id: &OrderId) -> Result<AccrualQueryResult, AccrualClientError> {
        let url = self.order_url(order_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        debug!(url = %url, status = %status, "Accrual service responded");

        match status {
            StatusCode::NO_CONTENT => Ok(AccrualQueryResult::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => Ok(AccrualQueryResult::RateLimited {
                retry_after: self.retry_after(&response),
            }),
            s if s.is_server_error() => Ok(AccrualQueryResult::ServerError),
            StatusCode::OK => {
                let body = response.bytes().await?;
                let parsed: AccrualResponse = serde_json::from_slice(&body)
                    .map_err(|e| AccrualClientError::Decode(e.to_string()))?;

                if parsed.order != order_id.as_str() {
                    warn!(
                        requested = %order_id,
                        returned = %parsed.order,
                        "Accrual service answered for a different order"
                    );
                }
                Ok(AccrualQueryResult::Found(parsed))
            }
            s => Err(AccrualClientError::UnexpectedStatus(s.as_u16())),
        }
    }
}
