use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::dispatch::{Action, ErrorSink};
use crate::retry::{retry_async, BackoffPolicy, RetryPolicy};
use crate::session::SessionProvider;
use crate::stream::endpoint::PageLocation;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// gRPC `UNKNOWN`, used when an error body carries no code.
const GRPC_UNKNOWN: i32 = 2;
pub const GATEWAYS_PATH: &str = "/api/gateways";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GatewayApiDefaults;

impl GatewayApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_ATTEMPTS: usize = 2;
    pub const BACKOFF: Duration = Duration::from_millis(100);
    pub const JITTER: Duration = Duration::from_millis(50);
}

#[derive(Clone, Debug)]
pub struct GatewayApiClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Applied to GET requests only; mutations are attempted once.
    pub retry_policy: RetryPolicy,
}

impl Default for GatewayApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: GatewayApiDefaults::CONNECT_TIMEOUT,
            request_timeout: GatewayApiDefaults::REQUEST_TIMEOUT,
            retry_policy: RetryPolicy {
                max_attempts: GatewayApiDefaults::MAX_ATTEMPTS,
                backoff: BackoffPolicy {
                    initial_delay: GatewayApiDefaults::BACKOFF,
                    multiplier: 2.0,
                    max_delay: GatewayApiDefaults::BACKOFF,
                    jitter: GatewayApiDefaults::JITTER,
                },
            },
        }
    }
}

#[derive(Clone)]
pub struct GatewayApiClient {
    http: Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
    error_sink: Option<Arc<dyn ErrorSink>>,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl GatewayApiClient {
    /// Creates a client for the API served from the same origin as the page.
    pub fn new(
        location: &PageLocation,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, GatewayApiError> {
        Self::with_options(
            location.http_base(),
            session,
            GatewayApiClientOptions::default(),
        )
    }

    pub fn with_options(
        base_url: impl Into<String>,
        session: Arc<dyn SessionProvider>,
        options: GatewayApiClientOptions,
    ) -> Result<Self, GatewayApiError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(GatewayApiError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            session,
            error_sink: None,
            request_timeout: options.request_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Publishes every failed request's error to `sink` as well. Failures
    /// without a server-provided code are published as gRPC `UNKNOWN` (2).
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists gateways visible to the session.
    pub async fn list(&self, limit: u32, offset: u32) -> Result<GatewayList, GatewayApiError> {
        let query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        let body = self
            .request(Method::GET, GATEWAYS_PATH.to_string(), query, None)
            .await?;
        parse_gateway_list(body)
    }

    /// Lists gateways belonging to one organization.
    pub async fn list_for_organization(
        &self,
        organization_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<GatewayList, GatewayApiError> {
        let query = vec![
            ("organizationID", organization_id.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let body = self
            .request(Method::GET, GATEWAYS_PATH.to_string(), query, None)
            .await?;
        parse_gateway_list(body)
    }

    /// Fetches aggregated gateway stats for `[start, end]` at `interval`
    /// granularity (e.g. `MINUTE`, `HOUR`, `DAY`).
    pub async fn stats(
        &self,
        mac: &str,
        interval: &str,
        start_timestamp: &str,
        end_timestamp: &str,
    ) -> Result<Vec<Value>, GatewayApiError> {
        let query = vec![
            ("interval", interval.to_string()),
            ("startTimestamp", start_timestamp.to_string()),
            ("endTimestamp", end_timestamp.to_string()),
        ];
        let path = format!("{}/stats", gateway_path(mac)?);
        let body = self.request(Method::GET, path, query, None).await?;
        parse_result_items(body)
    }

    pub async fn get(&self, mac: &str) -> Result<Value, GatewayApiError> {
        self.request(Method::GET, gateway_path(mac)?, Vec::new(), None)
            .await
    }

    pub async fn create<T>(&self, gateway: &T) -> Result<Value, GatewayApiError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(gateway).map_err(GatewayApiError::Serialize)?;
        self.request(Method::POST, GATEWAYS_PATH.to_string(), Vec::new(), Some(body))
            .await
    }

    pub async fn update<T>(&self, mac: &str, gateway: &T) -> Result<Value, GatewayApiError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(gateway).map_err(GatewayApiError::Serialize)?;
        self.request(Method::PUT, gateway_path(mac)?, Vec::new(), Some(body))
            .await
    }

    pub async fn delete(&self, mac: &str) -> Result<Value, GatewayApiError> {
        self.request(Method::DELETE, gateway_path(mac)?, Vec::new(), None)
            .await
    }

    /// Fetches the last ping the gateway took part in.
    pub async fn last_ping(&self, mac: &str) -> Result<Value, GatewayApiError> {
        let path = format!("{}/pings/last", gateway_path(mac)?);
        self.request(Method::GET, path, Vec::new(), None).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(
        &self,
        method: Method,
        path: String,
        query: Vec<(&'static str, String)>,
        body: Option<Value>,
    ) -> Result<Value, GatewayApiError> {
        let endpoint = self.endpoint(&path);
        let policy = if method == Method::GET {
            self.retry_policy.clone()
        } else {
            RetryPolicy::none()
        };

        let result = retry_async(
            &policy,
            |_| {
                let method = method.clone();
                let endpoint = endpoint.clone();
                let query = query.as_slice();
                let body = body.as_ref();
                async move { self.send_attempt(method, &endpoint, query, body).await }
            },
            GatewayApiError::is_retryable,
        )
        .await;

        if let Err(err) = &result {
            debug!(event = "gateway_api_request_failed", %method, path = %path, error = %err);
            self.report(err);
        }
        result
    }

    async fn send_attempt(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&'static str, String)],
        body: Option<&Value>,
    ) -> Result<Value, GatewayApiError> {
        let mut builder = self
            .http
            .request(method, endpoint)
            .timeout(self.request_timeout);

        if !query.is_empty() {
            builder = builder.query(query);
        }
        for (name, value) in self.session.header() {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(GatewayApiError::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(GatewayApiError::Transport)?;

        if !status.is_success() {
            return Err(http_status_error(status, &text));
        }

        parse_json_body(&text)
    }

    fn report(&self, err: &GatewayApiError) {
        let Some(sink) = self.error_sink.as_ref() else {
            return;
        };
        sink.dispatch(error_action(err));
    }
}

/// One page of gateways plus the total number available.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayList {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub result: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum GatewayApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {message}")]
    HttpStatus {
        status: StatusCode,
        code: Option<i32>,
        message: String,
    },

    #[error("failed to serialize request: {0}")]
    Serialize(serde_json::Error),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid gateway id: {0:?}")]
    InvalidGatewayId(String),
}

impl GatewayApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Serialize(_) | Self::Parse(_) | Self::InvalidGatewayId(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGatewayList {
    #[serde(rename = "totalCount", default, deserialize_with = "deserialize_count")]
    total_count: Option<u64>,
    #[serde(default)]
    result: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    result: Option<Vec<Value>>,
}

/// int64 fields arrive as JSON strings through grpc-gateway.
fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(count)) => Ok(Some(count)),
        Some(Count::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn parse_gateway_list(body: Value) -> Result<GatewayList, GatewayApiError> {
    let raw: RawGatewayList =
        serde_json::from_value(body).map_err(|err| GatewayApiError::Parse(err.to_string()))?;

    match raw.result {
        Some(result) => Ok(GatewayList {
            total_count: raw.total_count.unwrap_or(result.len() as u64),
            result,
        }),
        None => Ok(GatewayList::default()),
    }
}

fn parse_result_items(body: Value) -> Result<Vec<Value>, GatewayApiError> {
    let envelope: ResultEnvelope =
        serde_json::from_value(body).map_err(|err| GatewayApiError::Parse(err.to_string()))?;
    Ok(envelope.result.unwrap_or_default())
}

fn parse_json_body(text: &str) -> Result<Value, GatewayApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|err| GatewayApiError::Parse(err.to_string()))
}

fn http_status_error(status: StatusCode, body: &str) -> GatewayApiError {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<i32>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return GatewayApiError::HttpStatus {
                status,
                code: parsed.code,
                message,
            };
        }
    }

    GatewayApiError::HttpStatus {
        status,
        code: None,
        message: body.chars().take(ERROR_BODY_SNIPPET_LEN).collect(),
    }
}

/// Server-provided code and message for HTTP failures; gRPC `UNKNOWN` and
/// the rendered error otherwise.
fn error_action(err: &GatewayApiError) -> Action {
    match err {
        GatewayApiError::HttpStatus { code, message, .. } => {
            Action::create_error(code.unwrap_or(GRPC_UNKNOWN), message.clone())
        }
        other => Action::create_error(GRPC_UNKNOWN, other.to_string()),
    }
}

fn gateway_path(mac: &str) -> Result<String, GatewayApiError> {
    let mac = mac.trim();
    if mac.is_empty() || !mac.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayApiError::InvalidGatewayId(mac.to_string()));
    }
    Ok(format!("{GATEWAYS_PATH}/{mac}"))
}
