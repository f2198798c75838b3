//! Provider contract and request types.
//!
//! Every source of historical data, local or remote, implements
//! [`DataSource`]. The acquisition pipeline holds them as an ordered
//! `Vec<Arc<dyn DataSource>>` and walks it by ascending priority.
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`name`](DataSource::name) | Stable provider name, keys rate budget and health |
//! | [`priority`](DataSource::priority) | Lower is tried first |
//! | [`is_available`](DataSource::is_available) | Configuration check (credentials present) |
//! | [`fetch_bars`](DataSource::fetch_bars) | OHLCV bars for a symbol and date range |
//! | [`fetch_options`](DataSource::fetch_options) | Option chain for one expiry |
//! | [`check_health`](DataSource::check_health) | Cheap liveness probe |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use time::Date;

use crate::{format_date, Bar, OptionContract, Resolution, Symbol};

/// Classification of a failed provider call.
///
/// Only [`ProviderErrorKind::InvalidRequest`] stops the fallback loop; every
/// other kind lets the pipeline move on to the next provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Unavailable,
    RateLimited,
    Auth,
    NotFound,
    InvalidData,
    Timeout,
    Unsupported,
    InvalidRequest,
    Internal,
}

impl ProviderErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::InvalidData => "invalid_data",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        }
    }

    pub const fn allows_fallback(self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }
}

impl Display for ProviderErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidData, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unsupported, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }

    /// Map a non-2xx HTTP status onto an error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet = body.chars().take(200).collect::<String>();
        let message = format!("http status {status}: {snippet}");
        match status {
            401 | 403 => Self::auth(message),
            404 => Self::not_found(message),
            408 | 504 => Self::timeout(message),
            429 => Self::rate_limited(message),
            400..=499 => Self::invalid_data(message),
            _ => Self::unavailable(message),
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for ProviderError {}

/// Bars for `symbol` between two inclusive UTC dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarsRequest {
    pub symbol: Symbol,
    pub resolution: Resolution,
    pub from: Date,
    pub to: Date,
}

impl BarsRequest {
    pub fn new(
        symbol: Symbol,
        resolution: Resolution,
        from: Date,
        to: Date,
    ) -> Result<Self, ProviderError> {
        if to < from {
            return Err(ProviderError::invalid_request(format!(
                "range end {} precedes start {}",
                format_date(to),
                format_date(from)
            )));
        }
        Ok(Self {
            symbol,
            resolution,
            from,
            to,
        })
    }
}

/// Option chain snapshot for one expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsRequest {
    pub symbol: Symbol,
    pub expiry: Date,
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Provider contract.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent acquisition.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> u32;

    /// `false` when the provider is not configured, e.g. missing API key.
    /// Unavailable providers are skipped without an attempt.
    fn is_available(&self) -> bool {
        true
    }

    /// Rows from a local provider already live in the warehouse.
    fn is_local(&self) -> bool {
        false
    }

    fn requests_per_minute(&self) -> u32;

    fn fetch_bars<'a>(&'a self, request: BarsRequest) -> SourceFuture<'a, Vec<Bar>>;

    fn fetch_options<'a>(&'a self, request: OptionsRequest) -> SourceFuture<'a, Vec<OptionContract>> {
        let _ = request;
        let name = self.name().to_string();
        Box::pin(async move {
            Err(ProviderError::unsupported(format!(
                "provider '{name}' does not serve option chains"
            )))
        })
    }

    fn check_health<'a>(&'a self) -> SourceFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn only_invalid_request_stops_fallback() {
        assert!(!ProviderErrorKind::InvalidRequest.allows_fallback());
        assert!(ProviderErrorKind::RateLimited.allows_fallback());
        assert!(ProviderErrorKind::Timeout.allows_fallback());
        assert!(ProviderErrorKind::Auth.allows_fallback());
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(ProviderError::from_status(401, "").kind(), ProviderErrorKind::Auth);
        assert_eq!(
            ProviderError::from_status(429, "slow down").kind(),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind(),
            ProviderErrorKind::Unavailable
        );
    }

    #[test]
    fn reversed_range_is_an_invalid_request() {
        let error = BarsRequest::new(
            Symbol::parse("SPY").expect("symbol"),
            Resolution::OneDay,
            date!(2024 - 01 - 05),
            date!(2024 - 01 - 01),
        )
        .expect_err("must reject");
        assert_eq!(error.kind(), ProviderErrorKind::InvalidRequest);
    }
}
