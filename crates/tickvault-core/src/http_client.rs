//! GET-only HTTP transport shared by the network providers.
//!
//! Adapters build an [`HttpRequest`], hand it to an [`HttpClient`] and map
//! whatever comes back into a [`ProviderError`]. Tests swap the reqwest
//! client for canned responses through the same trait.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::data_source::ProviderError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Boxed transport future, borrowed from the client for its duration.
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Credentials attached to provider calls.
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    Bearer(String),
    ApiKeyHeader { header: String, key: String },
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::ApiKeyHeader { header, .. } => write!(f, "ApiKeyHeader({header}: ***)"),
        }
    }
}

/// A single GET against a provider endpoint. Header names are lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(self, auth: &HttpAuth) -> Self {
        match auth {
            HttpAuth::Bearer(token) => self.with_header("authorization", format!("Bearer {token}")),
            HttpAuth::ApiKeyHeader { header, key } => self.with_header(header, key.clone()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }
}

/// Failure below the HTTP status layer: DNS, connect, TLS, timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    timed_out: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

impl From<HttpError> for ProviderError {
    fn from(error: HttpError) -> Self {
        if error.timed_out {
            ProviderError::timeout(error.message)
        } else {
            ProviderError::unavailable(error.message)
        }
    }
}

pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest-backed transport; one connection pool per process.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tickvault/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "falling back to default http client");
                reqwest::Client::new()
            });
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> HttpError {
    // Query strings can carry credentials.
    let endpoint = url.split('?').next().unwrap_or(url);
    if error.is_timeout() {
        HttpError::timed_out(format!("GET {endpoint} timed out"))
    } else if error.is_connect() {
        HttpError::new(format!("GET {endpoint}: connection failed"))
    } else {
        HttpError::new(format!("GET {endpoint}: {error}"))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let builder = request
                .headers
                .iter()
                .fold(self.client.get(&request.url), |builder, (name, value)| {
                    builder.header(name, value)
                })
                .timeout(request.timeout);

            let response = builder
                .send()
                .await
                .map_err(|error| transport_error(&request.url, &error))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| transport_error(&request.url, &error))?;
            tracing::trace!(status, bytes = body.len(), "provider response");
            Ok(HttpResponse { status, body })
        })
    }
}
