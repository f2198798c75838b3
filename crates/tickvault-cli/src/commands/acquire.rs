use std::time::Instant;

use tickvault_core::{
    format_date, AcquisitionResult, EnvelopeError, ErrorCode, ProviderErrorKind, ValidationError,
};

use super::{failure, from_core, from_validation, CommandResult, Parameters};
use crate::service::Service;

/// Network acquisitions get a longer default budget than local reads.
pub const ACQUIRE_TIMEOUT_MS: u64 = 30_000;

pub async fn bars(service: &Service, parameters: Parameters<'_>) -> Result<CommandResult, EnvelopeError> {
    let symbol = parameters.symbol()?;
    let from = parameters.date("from")?;
    let to = parameters.date("to")?;
    if to < from {
        return Err(from_validation(&ValidationError::InvalidDateRange {
            from: format_date(from),
            to: format_date(to),
        }));
    }
    let resolution = parameters.resolution()?;
    let deadline = Instant::now() + parameters.timeout(ACQUIRE_TIMEOUT_MS)?;

    let result = service
        .pipeline()
        .acquire_bars(&symbol, resolution, from, to, Some(deadline))
        .await
        .map_err(from_core)?;
    settle(result)
}

pub async fn options(
    service: &Service,
    parameters: Parameters<'_>,
) -> Result<CommandResult, EnvelopeError> {
    let symbol = parameters.symbol()?;
    let expiry = parameters.date("date")?;
    let deadline = Instant::now() + parameters.timeout(ACQUIRE_TIMEOUT_MS)?;

    let result = service
        .pipeline()
        .acquire_options(&symbol, expiry, Some(deadline))
        .await
        .map_err(from_core)?;
    settle(result)
}

fn settle(result: AcquisitionResult) -> Result<CommandResult, EnvelopeError> {
    if !result.success {
        return Err(acquisition_failure(&result));
    }
    let count = result.rows_acquired();
    let mut command = CommandResult::new(&result, count)?;
    for attempt in &result.failures {
        command = command.with_warning(format!(
            "{} failed before fallback ({}): {}",
            attempt.provider,
            attempt.kind.as_str(),
            attempt.message
        ));
    }
    Ok(command)
}

/// A uniform failure kind across every attempt gets its own code; anything
/// mixed is a provider error.
fn acquisition_failure(result: &AcquisitionResult) -> EnvelopeError {
    let uniform = |kind: ProviderErrorKind| {
        !result.failures.is_empty() && result.failures.iter().all(|attempt| attempt.kind == kind)
    };
    let (code, hint) = if uniform(ProviderErrorKind::Auth) {
        (ErrorCode::AuthError, "check TICKVAULT_POLYGON_API_KEY")
    } else if uniform(ProviderErrorKind::RateLimited) {
        (ErrorCode::RateLimitExceeded, "retry once the provider budget refills")
    } else if uniform(ProviderErrorKind::Timeout) {
        (ErrorCode::DeadlineExceeded, "raise --timeout-ms")
    } else if uniform(ProviderErrorKind::NotFound) {
        (ErrorCode::DataNotFound, "no provider has data for this symbol and range")
    } else {
        (ErrorCode::ProviderError, "run 'tickvault provider-status' for provider health")
    };
    let message = result
        .error_message
        .clone()
        .unwrap_or_else(|| String::from("no provider could serve the request"));
    failure(code, message).with_hint(hint)
}
