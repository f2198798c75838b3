//! Partition router and query engine.
//!
//! Resolves a logical query into the catalog partitions it intersects, reads
//! each one restricted to the requested range, merges them by precedence
//! (highest generation first, first key wins) and re-validates the merged
//! output before returning it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use time::Date;
use tickvault_warehouse::{
    BarRecord, Dataset, DateRange, OptionRecord, OptionRight, ReadGuardrails, Warehouse,
    WarehouseError,
};

use crate::quality::{validate_bars, validate_chain};
use crate::{format_date, Bar, CoreError, OptionContract, Resolution, Symbol, ValidationError};

#[derive(Clone)]
pub struct QueryEngine {
    warehouse: Warehouse,
}

impl QueryEngine {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Bars of `symbol` between two inclusive dates, ascending by timestamp.
    ///
    /// No intersecting partition is an empty success.
    pub async fn query_bars(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        from: Date,
        to: Date,
        timeout: Duration,
    ) -> Result<Vec<Bar>, CoreError> {
        let range = DateRange::new(from, to).ok_or_else(|| ValidationError::InvalidDateRange {
            from: format_date(from),
            to: format_date(to),
        })?;
        let warehouse = self.warehouse.clone();
        let symbol = symbol.clone();
        self.bounded(timeout, move |guardrails| {
            read_bars(&warehouse, &symbol, resolution, range, guardrails)
        })
        .await
    }

    /// Option chain of `symbol` for one expiry, strike ascending, CALL before PUT.
    pub async fn query_options(
        &self,
        symbol: &Symbol,
        expiry: Date,
        timeout: Duration,
    ) -> Result<Vec<OptionContract>, CoreError> {
        let warehouse = self.warehouse.clone();
        let symbol = symbol.clone();
        self.bounded(timeout, move |guardrails| {
            read_chain(&warehouse, &symbol, expiry, guardrails)
        })
        .await
    }

    /// Run a blocking read with the deadline enforced both per row and
    /// around the whole task.
    async fn bounded<T, F>(&self, timeout: Duration, read: F) -> Result<T, CoreError>
    where
        F: FnOnce(ReadGuardrails) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let guardrails = ReadGuardrails::with_deadline(Instant::now() + timeout);
        let task = tokio::task::spawn_blocking(move || read(guardrails));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(|error| match error {
                CoreError::DeadlineExceeded { .. }
                | CoreError::Warehouse(WarehouseError::DeadlineExceeded) => {
                    CoreError::DeadlineExceeded { timeout_ms }
                }
                other => other,
            }),
            Ok(Err(join)) => Err(CoreError::Internal(format!("query task failed: {join}"))),
            Err(_) => Err(CoreError::DeadlineExceeded { timeout_ms }),
        }
    }
}

fn read_bars(
    warehouse: &Warehouse,
    symbol: &Symbol,
    resolution: Resolution,
    range: DateRange,
    guardrails: ReadGuardrails,
) -> Result<Vec<Bar>, CoreError> {
    let partitions = warehouse.resolve(symbol.as_str(), resolution.dataset(), &range);
    if partitions.is_empty() {
        tracing::debug!(%symbol, resolution = %resolution, "no partitions intersect the query");
        return Ok(Vec::new());
    }

    let (from_ts, to_ts) = range.unix_bounds();
    let mut merged: BTreeMap<i64, (BarRecord, usize)> = BTreeMap::new();
    for (slot, info) in partitions.iter().enumerate() {
        let rows = warehouse
            .read_bars(info, from_ts, to_ts, guardrails)
            .map_err(|error| CoreError::from_warehouse(error, 0))?;
        for row in rows {
            merged.entry(row.ts).or_insert((row, slot));
        }
    }

    let mut origins = Vec::with_capacity(merged.len());
    let mut bars = Vec::with_capacity(merged.len());
    for (record, slot) in merged.into_values() {
        let partition = &partitions[slot].id;
        let bar = Bar::from_record(symbol, resolution, &record).map_err(|error| {
            CoreError::PartitionCorruption {
                partition: partition.clone(),
                reason: error.to_string(),
            }
        })?;
        origins.push(partition);
        bars.push(bar);
    }
    validate_bars(&bars).map_err(|violation| CoreError::PartitionCorruption {
        partition: origins[violation.index].to_string(),
        reason: violation.to_string(),
    })?;
    Ok(bars)
}

fn read_chain(
    warehouse: &Warehouse,
    symbol: &Symbol,
    expiry: Date,
    guardrails: ReadGuardrails,
) -> Result<Vec<OptionContract>, CoreError> {
    let partitions = warehouse.resolve(symbol.as_str(), Dataset::Options, &DateRange::single(expiry));
    if partitions.is_empty() {
        tracing::debug!(%symbol, expiry = %format_date(expiry), "no option partitions for expiry");
        return Ok(Vec::new());
    }

    let mut merged: BTreeMap<(u64, OptionRight), (OptionRecord, usize)> = BTreeMap::new();
    for (slot, info) in partitions.iter().enumerate() {
        let rows = warehouse
            .read_options(info, expiry, guardrails)
            .map_err(|error| CoreError::from_warehouse(error, 0))?;
        for row in rows {
            let (_, strike, right) = row.key();
            merged.entry((strike, right)).or_insert((row, slot));
        }
    }

    let mut entries = merged
        .into_values()
        .map(|(record, slot)| {
            let partition = &partitions[slot].id;
            OptionContract::from_record(symbol, &record)
                .map(|contract| (contract, partition))
                .map_err(|error| CoreError::PartitionCorruption {
                    partition: partition.clone(),
                    reason: error.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|left, right| left.0.chain_order(&right.0));

    let (chain, origins): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
    validate_chain(&chain).map_err(|violation| CoreError::PartitionCorruption {
        partition: origins[violation.index].to_string(),
        reason: violation.to_string(),
    })?;
    Ok(chain)
}
