//! Versioned response envelope shared by the CLI and the IPC service.
//!
//! ```json
//! {"schema":"tickvault/v1","ok":true,"data":{...},
//!  "meta":{"count":1,"timestamp":"...","request_id":"...","latency_ms":2}}
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{UtcDateTime, ValidationError};

/// Current wire schema. Its meaning never changes without a major bump.
pub const SCHEMA_VERSION: &str = "tickvault/v1";

/// Stable error codes. The first six are frozen; the rest are additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidSymbol,
    InvalidDateRange,
    DataNotFound,
    RateLimitExceeded,
    InternalError,
    InvalidArguments,
    ProviderError,
    AuthError,
    DeadlineExceeded,
    PartitionCorruption,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSymbol => "INVALID_SYMBOL",
            Self::InvalidDateRange => "INVALID_DATE_RANGE",
            Self::DataNotFound => "DATA_NOT_FOUND",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::PartitionCorruption => "PARTITION_CORRUPTION",
        }
    }

    /// Process exit code for a CLI invocation failing with this code.
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::InvalidSymbol | Self::InvalidDateRange | Self::InvalidArguments => 2,
            Self::DataNotFound => 3,
            Self::RateLimitExceeded | Self::ProviderError => 4,
            Self::AuthError => 5,
            Self::DeadlineExceeded => 1,
            Self::InternalError | Self::PartitionCorruption => 10,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl EnvelopeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Result<Self, ValidationError> {
        let error = Self {
            code,
            message: message.into(),
            hint: None,
        };
        error.validate()?;
        Ok(error)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyErrorMessage);
        }
        Ok(())
    }
}

/// Metadata attached to every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub count: usize,
    pub timestamp: UtcDateTime,
    pub request_id: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    pub fn new(request_id: impl Into<String>, count: usize, latency_ms: u64) -> Self {
        Self {
            count,
            timestamp: UtcDateTime::now(),
            request_id: request_id.into(),
            latency_ms,
            warnings: Vec::new(),
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// `{schema, ok, data | error, meta}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema: String,
    pub ok: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    pub meta: EnvelopeMeta,
}

impl<T> Envelope<T> {
    pub fn success(meta: EnvelopeMeta, data: T) -> Self {
        Self {
            schema: String::from(SCHEMA_VERSION),
            ok: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn failure(meta: EnvelopeMeta, error: EnvelopeError) -> Self {
        Self {
            schema: String::from(SCHEMA_VERSION),
            ok: false,
            data: None,
            error: Some(error),
            meta,
        }
    }

    /// Exactly one of `data` / `error` is present and matches `ok`.
    pub fn is_well_formed(&self) -> bool {
        is_valid_schema_version(&self.schema)
            && self.meta.request_id.len() >= 8
            && match (self.ok, &self.data, &self.error) {
                (true, Some(_), None) => true,
                (false, None, Some(error)) => error.validate().is_ok(),
                _ => false,
            }
    }
}

/// `name/vMAJOR`.
pub fn is_valid_schema_version(value: &str) -> bool {
    let Some((name, version)) = value.split_once('/') else {
        return false;
    };
    let Some(major) = version.strip_prefix('v') else {
        return false;
    };
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        && !major.is_empty()
        && major.chars().all(|ch| ch.is_ascii_digit())
}
