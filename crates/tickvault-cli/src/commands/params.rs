use std::time::Duration;

use serde_json::{Map, Value};
use time::Date;
use tickvault_core::{parse_date, EnvelopeError, ErrorCode, Resolution, Symbol};

use super::{failure, from_validation};

/// Typed view over a request's `parameters` object.
#[derive(Debug, Clone, Copy)]
pub struct Parameters<'a> {
    values: &'a Map<String, Value>,
}

impl<'a> Parameters<'a> {
    pub fn new(values: &'a Map<String, Value>) -> Self {
        Self { values }
    }

    fn optional_str(&self, name: &str) -> Result<Option<&'a str>, EnvelopeError> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(failure(
                ErrorCode::InvalidArguments,
                format!("parameter '{name}' must be a string, got {other}"),
            )),
        }
    }

    fn required_str(&self, name: &str) -> Result<&'a str, EnvelopeError> {
        self.optional_str(name)?.ok_or_else(|| {
            failure(
                ErrorCode::InvalidArguments,
                format!("missing required parameter '{name}'"),
            )
        })
    }

    pub fn symbol(&self) -> Result<Symbol, EnvelopeError> {
        Symbol::parse(self.required_str("symbol")?).map_err(|error| from_validation(&error))
    }

    pub fn optional_symbol(&self) -> Result<Option<Symbol>, EnvelopeError> {
        self.optional_str("symbol")?
            .map(|raw| Symbol::parse(raw).map_err(|error| from_validation(&error)))
            .transpose()
    }

    pub fn date(&self, name: &str) -> Result<Date, EnvelopeError> {
        parse_date(self.required_str(name)?).map_err(|error| {
            from_validation(&error).with_hint(format!("'{name}' must be a YYYY-MM-DD date"))
        })
    }

    /// `granularity`, defaulting to daily bars.
    pub fn resolution(&self) -> Result<Resolution, EnvelopeError> {
        match self.optional_str("granularity")? {
            None => Ok(Resolution::OneDay),
            Some(raw) => raw.parse::<Resolution>().map_err(|error| {
                from_validation(&error).with_hint("granularity is one of 1m, 5m, 1h, 1d")
            }),
        }
    }

    /// `timeoutMs`, falling back to `default_ms`.
    pub fn timeout(&self, default_ms: u64) -> Result<Duration, EnvelopeError> {
        let millis = match self.values.get("timeoutMs") {
            None | Some(Value::Null) => default_ms,
            Some(value) => value.as_u64().filter(|ms| *ms > 0).ok_or_else(|| {
                failure(
                    ErrorCode::InvalidArguments,
                    format!("timeoutMs must be a positive integer, got {value}"),
                )
            })?,
        };
        Ok(Duration::from_millis(millis))
    }
}
