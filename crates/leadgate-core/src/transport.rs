use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::DateRange;

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

/// One page of leads for a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportRequest {
    pub range: DateRange,
    pub page: u32,
}

impl TransportRequest {
    pub const fn new(range: DateRange, page: u32) -> Self {
        Self { range, page }
    }

    /// Parameters identifying this request in the response cache.
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        let bound = |value: Option<crate::UtcDateTime>| {
            value.map(|instant| instant.format_rfc3339()).unwrap_or_default()
        };
        vec![
            ("start", bound(self.range.start)),
            ("end", bound(self.range.end)),
            ("page", self.page.to_string()),
        ]
    }
}

/// Application-level upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Upstream error text, read from the `message` or `error` field.
    pub fn error_message(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            Value::Object(fields) => ["message", "error"]
                .iter()
                .filter_map(|name| fields.get(*name))
                .find_map(|field| match field {
                    Value::String(text) => Some(text.clone()),
                    Value::Object(nested) => nested
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    _ => None,
                })
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Failure before any application response arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
    retryable: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Opaque upstream call.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        (**self).send(request)
    }
}

/// Transport that answers every request with an empty lead list.
#[derive(Debug, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        let _ = request;
        Box::pin(async move { Ok(TransportResponse::ok(Value::Array(Vec::new()))) })
    }
}

/// Adapts a closure returning a future into a [`Transport`].
pub struct FnTransport<F> {
    handler: F,
}

impl<F> FnTransport<F> {
    pub const fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(TransportRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransportResponse, TransportError>> + Send + 'static,
{
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        Box::pin((self.handler)(request))
    }
}

impl<F> std::fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

/// Production transport issuing `GET` requests with reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ReqwestTransport {
    pub const API_KEY_HEADER: &'static str = "x-api-key";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("leadgate/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
            base_url: base_url.into(),
            api_key: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Create a transport with a custom reqwest::Client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            ..Self::new(base_url)
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full request URL with the upstream's date dialect.
    pub fn request_url(&self, request: &TransportRequest) -> Result<String, TransportError> {
        let (start, end) = request
            .range
            .bounds()
            .ok_or_else(|| TransportError::non_retryable("date range is missing a bound"))?;
        let start = start
            .format_upstream()
            .map_err(|error| TransportError::non_retryable(error.to_string()))?;
        let end = end
            .format_upstream()
            .map_err(|error| TransportError::non_retryable(error.to_string()))?;

        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{separator}start_date={}&end_date={}&page={}",
            self.base_url,
            urlencoding::encode(&start),
            urlencoding::encode(&end),
            request.page
        ))
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let url = self.request_url(&request)?;
            let mut builder = self.client.get(&url).timeout(self.timeout);
            if let Some(api_key) = &self.api_key {
                builder = builder.header(Self::API_KEY_HEADER, api_key);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::new(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::new(format!("connection failed: {e}"))
                } else if e.is_builder() {
                    TransportError::non_retryable(format!("invalid request: {e}"))
                } else {
                    TransportError::new(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::new(format!("failed to read response body: {e}")))?;
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

            Ok(TransportResponse { status, body })
        })
    }
}
