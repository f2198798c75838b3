use std::time::Duration;

use time::Date;

use crate::data_source::{BarsRequest, DataSource, OptionsRequest, ProviderError, SourceFuture};
use crate::query::QueryEngine;
use crate::{Bar, CoreError, OptionContract};

const LOCAL_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest run of calendar days a market closure explains (a weekend next
/// to a holiday).
const MAX_CLOSED_DAYS: i64 = 3;

/// Serves rows already stored in the warehouse.
///
/// Rows it returns are never re-imported. Bars are served only when they
/// cover the whole requested range; an empty or partial result is
/// `NotFound`, which the pipeline treats as a miss and falls through to the
/// network providers.
#[derive(Clone)]
pub struct LocalPartitionProvider {
    engine: QueryEngine,
}

impl LocalPartitionProvider {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }
}

impl DataSource for LocalPartitionProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn priority(&self) -> u32 {
        0
    }

    fn is_local(&self) -> bool {
        true
    }

    fn requests_per_minute(&self) -> u32 {
        6_000
    }

    fn fetch_bars<'a>(&'a self, request: BarsRequest) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move {
            let bars = self
                .engine
                .query_bars(
                    &request.symbol,
                    request.resolution,
                    request.from,
                    request.to,
                    LOCAL_READ_TIMEOUT,
                )
                .await
                .map_err(to_provider_error)?;
            if bars.is_empty() {
                return Err(ProviderError::not_found(format!(
                    "no stored {} bars for {}",
                    request.resolution, request.symbol
                )));
            }
            if !covers(&bars, request.from, request.to) {
                return Err(ProviderError::not_found(format!(
                    "stored {} bars for {} cover only part of the range",
                    request.resolution, request.symbol
                )));
            }
            Ok(bars)
        })
    }

    fn fetch_options<'a>(&'a self, request: OptionsRequest) -> SourceFuture<'a, Vec<OptionContract>> {
        Box::pin(async move {
            self.engine
                .query_options(&request.symbol, request.expiry, LOCAL_READ_TIMEOUT)
                .await
                .map_err(to_provider_error)
        })
    }

    fn check_health<'a>(&'a self) -> SourceFuture<'a, ()> {
        Box::pin(async move {
            if self.engine.warehouse().home().is_dir() {
                Ok(())
            } else {
                Err(ProviderError::unavailable("warehouse home directory is missing"))
            }
        })
    }
}

/// `bars` are ascending. Every gap, including the ones before the first and
/// after the last bar, must be short enough to be a market closure.
fn covers(bars: &[Bar], from: Date, to: Date) -> bool {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return false;
    };
    let leading = (first.ts.date() - from).whole_days();
    let trailing = (to - last.ts.date()).whole_days();
    let widest_gap = bars
        .windows(2)
        .map(|pair| (pair[1].ts.date() - pair[0].ts.date()).whole_days() - 1)
        .max()
        .unwrap_or(0);
    leading <= MAX_CLOSED_DAYS && trailing <= MAX_CLOSED_DAYS && widest_gap <= MAX_CLOSED_DAYS
}

fn to_provider_error(error: CoreError) -> ProviderError {
    match error {
        CoreError::PartitionCorruption { .. } => ProviderError::invalid_data(error.to_string()),
        CoreError::DeadlineExceeded { .. } => ProviderError::timeout(error.to_string()),
        CoreError::Validation(_) => ProviderError::invalid_request(error.to_string()),
        other => ProviderError::internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{Resolution, Symbol, UtcDateTime};

    fn bars_on(days: &[Date]) -> Vec<Bar> {
        let symbol = Symbol::parse("SPY").expect("symbol");
        days.iter()
            .map(|day| {
                Bar::new(
                    symbol.clone(),
                    Resolution::OneDay,
                    UtcDateTime::start_of(*day),
                    470.0,
                    471.0,
                    469.0,
                    470.5,
                    1_000,
                )
                .expect("bar")
            })
            .collect()
    }

    #[test]
    fn holiday_weekend_still_counts_as_covered() {
        // Fri 2024-01-12, MLK day Mon 2024-01-15 closed.
        let bars = bars_on(&[date!(2024 - 01 - 11), date!(2024 - 01 - 12), date!(2024 - 01 - 16)]);
        assert!(covers(&bars, date!(2024 - 01 - 11), date!(2024 - 01 - 16)));
        assert!(covers(&bars, date!(2024 - 01 - 08), date!(2024 - 01 - 19)));
    }

    #[test]
    fn a_single_stored_day_does_not_cover_a_month() {
        let bars = bars_on(&[date!(2024 - 01 - 15)]);
        assert!(!covers(&bars, date!(2024 - 01 - 01), date!(2024 - 01 - 31)));
        assert!(covers(&bars, date!(2024 - 01 - 15), date!(2024 - 01 - 15)));
    }

    #[test]
    fn a_hole_inside_the_range_is_not_covered() {
        let bars = bars_on(&[date!(2024 - 01 - 02), date!(2024 - 01 - 03), date!(2024 - 01 - 10)]);
        assert!(!covers(&bars, date!(2024 - 01 - 02), date!(2024 - 01 - 10)));
        assert!(!covers(&[], date!(2024 - 01 - 02), date!(2024 - 01 - 02)));
    }
}
