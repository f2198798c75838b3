//! Data Quality Validator.
//!
//! Used inline by the acquisition pipeline (a rejected batch is never
//! imported), by the query engine on its output, and out-of-band through
//! [`audit_partitions`].

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tickvault_warehouse::{IntegrityReport, Warehouse, WarehouseError};

use crate::{Bar, OptionContract, Symbol, ValidationError};

/// A row that broke a batch invariant.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {index}: {error}")]
pub struct QualityViolation {
    pub index: usize,
    pub error: ValidationError,
}

/// Every row valid and timestamps strictly increasing.
pub fn validate_bars(bars: &[Bar]) -> Result<(), QualityViolation> {
    for (index, bar) in bars.iter().enumerate() {
        bar.validate()
            .map_err(|error| QualityViolation { index, error })?;
        if index > 0 && bars[index - 1].ts >= bar.ts {
            return Err(QualityViolation {
                index,
                error: ValidationError::NonMonotonicTimestamps { index },
            });
        }
    }
    Ok(())
}

/// Every contract valid and keys strictly increasing in chain order.
pub fn validate_chain(chain: &[OptionContract]) -> Result<(), QualityViolation> {
    for (index, contract) in chain.iter().enumerate() {
        contract
            .validate()
            .map_err(|error| QualityViolation { index, error })?;
        if index > 0 && chain[index - 1].chain_order(contract).is_ge() {
            return Err(QualityViolation {
                index,
                error: ValidationError::DuplicateContract { index },
            });
        }
    }
    Ok(())
}

/// Drop repeated timestamps (first occurrence in input order wins), then
/// sort ascending.
pub fn dedup_bars(bars: Vec<Bar>) -> Vec<Bar> {
    let mut seen = HashSet::with_capacity(bars.len());
    let mut unique = bars
        .into_iter()
        .filter(|bar| seen.insert(bar.ts))
        .collect::<Vec<_>>();
    unique.sort_by_key(|bar| bar.ts);
    unique
}

/// Drop repeated `(expiry, strike, right)` keys (first wins), then sort in
/// chain order.
pub fn dedup_chain(chain: Vec<OptionContract>) -> Vec<OptionContract> {
    let mut seen = HashSet::with_capacity(chain.len());
    let mut unique = chain
        .into_iter()
        .filter(|contract| seen.insert(contract.to_record().key()))
        .collect::<Vec<_>>();
    unique.sort_by(OptionContract::chain_order);
    unique
}

/// Summary of an out-of-band partition audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub partitions_checked: usize,
    pub partitions_failed: usize,
    pub reports: Vec<IntegrityReport>,
}

impl AuditReport {
    pub fn ok(&self) -> bool {
        self.partitions_failed == 0
    }
}

/// Verify every partition, or those of one symbol. Blocking; run it off the
/// async runtime.
pub fn audit_partitions(
    warehouse: &Warehouse,
    symbol: Option<&Symbol>,
) -> Result<AuditReport, WarehouseError> {
    let reports = warehouse.verify_all(symbol.map(Symbol::as_str))?;
    let partitions_failed = reports.iter().filter(|report| !report.ok).count();
    Ok(AuditReport {
        partitions_checked: reports.len(),
        partitions_failed,
        reports,
    })
}
