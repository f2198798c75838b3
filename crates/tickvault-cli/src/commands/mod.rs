mod acquire;
mod bars;
mod discover;
mod options;
mod params;
mod provider_status;
mod verify;

use serde::Serialize;
use serde_json::Value;
use tickvault_core::{CoreError, EnvelopeError, ErrorCode, ValidationError};
use tickvault_warehouse::WarehouseError;

use crate::service::Service;

pub use params::Parameters;

/// Frozen command surface.
pub const COMMANDS: &[&str] = &["discover", "version", "get-bars", "get-options", "provider-status"];

/// Additive commands, listed separately so callers can rely on `COMMANDS`.
pub const EXTENSIONS: &[&str] = &["acquire", "acquire-options", "verify", "serve"];

pub struct CommandResult {
    pub data: Value,
    pub count: usize,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn new(data: &impl Serialize, count: usize) -> Result<Self, EnvelopeError> {
        let data = serde_json::to_value(data).map_err(|error| {
            failure(ErrorCode::InternalError, format!("failed to encode response: {error}"))
        })?;
        Ok(Self {
            data,
            count,
            warnings: Vec::new(),
        })
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Commands answered without opening the warehouse, so they succeed even
/// when storage is locked by another process or unwritable.
pub fn without_storage(command: &str) -> Option<Result<CommandResult, EnvelopeError>> {
    match command {
        "discover" => Some(discover::discover()),
        "version" => Some(discover::version()),
        _ => None,
    }
}

pub async fn dispatch(
    service: &Service,
    command: &str,
    parameters: Parameters<'_>,
) -> Result<CommandResult, EnvelopeError> {
    if let Some(result) = without_storage(command) {
        return result;
    }
    match command {
        "get-bars" => bars::run(service, parameters).await,
        "get-options" => options::run(service, parameters).await,
        "provider-status" => provider_status::run(service),
        "acquire" => acquire::bars(service, parameters).await,
        "acquire-options" => acquire::options(service, parameters).await,
        "verify" => verify::run(service, parameters).await,
        "serve" => Err(failure(
            ErrorCode::InvalidArguments,
            "'serve' starts the service and is not a request command",
        )),
        other => Err(failure(ErrorCode::InvalidArguments, format!("unknown command '{other}'"))
            .with_hint("run 'discover' to list commands")),
    }
}

/// Error body for `code`. Blank messages fall back to the code itself.
pub fn failure(code: ErrorCode, message: impl Into<String>) -> EnvelopeError {
    let message = message.into();
    EnvelopeError::new(code, message).unwrap_or_else(|_| EnvelopeError {
        code,
        message: code.as_str().to_ascii_lowercase(),
        hint: None,
    })
}

pub fn from_validation(error: &ValidationError) -> EnvelopeError {
    let code = match error {
        ValidationError::EmptySymbol
        | ValidationError::SymbolTooLong { .. }
        | ValidationError::SymbolInvalidStart { .. }
        | ValidationError::SymbolInvalidChar { .. } => ErrorCode::InvalidSymbol,
        ValidationError::InvalidDate { .. } | ValidationError::InvalidDateRange { .. } => {
            ErrorCode::InvalidDateRange
        }
        _ => ErrorCode::InvalidArguments,
    };
    failure(code, error.to_string())
}

pub fn from_core(error: CoreError) -> EnvelopeError {
    match error {
        CoreError::Validation(error) => from_validation(&error),
        CoreError::PartitionCorruption { .. }
        | CoreError::Warehouse(WarehouseError::PartitionCorruption { .. }) => {
            tracing::warn!(%error, "corrupt partition encountered");
            failure(ErrorCode::PartitionCorruption, error.to_string())
                .with_hint("run 'tickvault verify' and re-acquire the affected range")
        }
        CoreError::DeadlineExceeded { .. }
        | CoreError::Warehouse(WarehouseError::DeadlineExceeded) => {
            failure(ErrorCode::DeadlineExceeded, error.to_string())
                .with_hint("raise --timeout-ms or narrow the date range")
        }
        CoreError::Warehouse(WarehouseError::EncryptionKeyMissing { .. }) => {
            failure(ErrorCode::AuthError, error.to_string())
                .with_hint("set TICKVAULT_PARTITION_KEY to the key the partition was written with")
        }
        other => {
            tracing::error!(error = %other, "request failed");
            failure(ErrorCode::InternalError, other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_contract_codes() {
        assert_eq!(from_validation(&ValidationError::EmptySymbol).code, ErrorCode::InvalidSymbol);
        let range = ValidationError::InvalidDateRange {
            from: String::from("2024-02-01"),
            to: String::from("2024-01-01"),
        };
        assert_eq!(from_validation(&range).code, ErrorCode::InvalidDateRange);
        let resolution = ValidationError::InvalidResolution {
            value: String::from("2w"),
        };
        assert_eq!(from_validation(&resolution).code, ErrorCode::InvalidArguments);
    }

    #[test]
    fn core_errors_map_to_transport_codes() {
        let corrupt = from_core(CoreError::PartitionCorruption {
            partition: String::from("SPY/bars_1d/000001"),
            reason: String::from("row count mismatch"),
        });
        assert_eq!(corrupt.code, ErrorCode::PartitionCorruption);
        assert!(corrupt.message.contains("SPY/bars_1d/000001"));
        assert!(corrupt.hint.is_some());

        let deadline = from_core(CoreError::DeadlineExceeded { timeout_ms: 5 });
        assert_eq!(deadline.code, ErrorCode::DeadlineExceeded);
        assert_eq!(deadline.code.exit_code(), 1);

        let internal = from_core(CoreError::Internal(String::from("task panicked")));
        assert_eq!(internal.code, ErrorCode::InternalError);
        assert_eq!(internal.code.exit_code(), 10);
    }

    #[test]
    fn blank_failure_message_falls_back_to_code() {
        let error = failure(ErrorCode::DataNotFound, "   ");
        assert_eq!(error.message, "data_not_found");
        assert!(error.validate().is_ok());
    }
}
