use serde::Serialize;
use time::Date;
use tickvault_core::domain::timestamp::iso_date;
use tickvault_core::{
    format_date, EmptyResultPolicy, EnvelopeError, ErrorCode, OptionContract, Symbol,
};

use super::{failure, from_core, CommandResult, Parameters};
use crate::service::Service;

#[derive(Debug, Serialize)]
struct ChainResponse {
    symbol: Symbol,
    #[serde(with = "iso_date")]
    expiry: Date,
    chain: Vec<OptionContract>,
}

pub async fn run(service: &Service, parameters: Parameters<'_>) -> Result<CommandResult, EnvelopeError> {
    let symbol = parameters.symbol()?;
    let expiry = parameters.date("date")?;
    let timeout = parameters.timeout(service.config().default_timeout_ms)?;

    let chain = service
        .engine()
        .query_options(&symbol, expiry, timeout)
        .await
        .map_err(from_core)?;

    if chain.is_empty() && service.config().empty_result == EmptyResultPolicy::NotFound {
        return Err(failure(
            ErrorCode::DataNotFound,
            format!("no option chain for {symbol} expiring {}", format_date(expiry)),
        )
        .with_hint("run 'tickvault acquire-options' for this expiry first"));
    }

    let count = chain.len();
    CommandResult::new(
        &ChainResponse {
            symbol,
            expiry,
            chain,
        },
        count,
    )
}
