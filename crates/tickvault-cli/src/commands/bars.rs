use serde::Serialize;
use time::Date;
use tickvault_core::domain::timestamp::iso_date;
use tickvault_core::{
    format_date, Bar, EmptyResultPolicy, EnvelopeError, ErrorCode, Resolution, Symbol,
    ValidationError,
};

use super::{failure, from_core, from_validation, CommandResult, Parameters};
use crate::service::Service;

#[derive(Debug, Serialize)]
struct BarsResponse {
    symbol: Symbol,
    granularity: Resolution,
    #[serde(with = "iso_date")]
    from: Date,
    #[serde(with = "iso_date")]
    to: Date,
    bars: Vec<Bar>,
}

pub async fn run(service: &Service, parameters: Parameters<'_>) -> Result<CommandResult, EnvelopeError> {
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
    let timeout = parameters.timeout(service.config().default_timeout_ms)?;

    let bars = service
        .engine()
        .query_bars(&symbol, resolution, from, to, timeout)
        .await
        .map_err(from_core)?;

    if bars.is_empty() && service.config().empty_result == EmptyResultPolicy::NotFound {
        return Err(failure(
            ErrorCode::DataNotFound,
            format!(
                "no {resolution} bars for {symbol} between {} and {}",
                format_date(from),
                format_date(to)
            ),
        )
        .with_hint("run 'tickvault acquire' for this range first"));
    }

    let count = bars.len();
    let response = BarsResponse {
        symbol,
        granularity: resolution,
        from,
        to,
        bars,
    };
    CommandResult::new(&response, count)
}
