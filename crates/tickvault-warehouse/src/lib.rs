//! # Tickvault Warehouse
//!
//! Partitioned DuckDB storage for tickvault.
//!
//! ## Overview
//!
//! Every `(symbol, dataset, [start, end])` partition lives in its own DuckDB
//! file. A catalog database records partition ranges, row counts and a
//! monotonically increasing `generation` that decides precedence when
//! partitions overlap.
//!
//! ```text
//! <home>/
//!   catalog.duckdb
//!   partitions/<symbol>/<dataset>/<start>_<end>.duckdb
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickvault_warehouse::{BarRecord, Dataset, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     let rows = vec![BarRecord {
//!         ts: 1_705_276_800,
//!         open: 470.0,
//!         high: 472.5,
//!         low: 469.0,
//!         close: 471.2,
//!         volume: 1_000_000,
//!     }];
//!     warehouse.write_bars("SPY", Dataset::Bars1d, &rows, "example")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Database | Table | Description |
//! |----------|-------|-------------|
//! | catalog | `partitions` | Partition ranges, row counts, generation |
//! | catalog | `ingest_log` | Import audit log |
//! | partition | `bars` / `bars_sealed` | OHLCV rows keyed by `ts` |
//! | partition | `options` / `options_sealed` | Contracts keyed by `(expiry, strike, right)` |
//! | partition | `partition_meta` | Partition id, dataset and encryption flag |

mod catalog;
pub mod crypto;
pub mod duckdb;
mod integrity;
pub mod migrations;
mod partition;
pub mod records;

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use ::duckdb::Connection;
use thiserror::Error;
use time::Date;

use crate::catalog::Catalog;
use crate::partition::PartitionFile;

pub use crate::crypto::{EncryptionKey, RowCipher};
pub use crate::duckdb::{DuckDbConnectionManager, PooledConnection};
pub use crate::partition::ReadGuardrails;
pub use crate::records::{
    check_bar, check_option, date_of_unix, format_date, parse_date, BarRecord, Dataset, DateRange,
    ImportReport, IntegrityReport, OptionRecord, OptionRight, PartitionInfo, PartitionKey,
    RowViolation,
};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Sealed payload (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// An import batch failed validation; nothing was written.
    #[error("batch rejected for partition '{partition}' at row {index}: {violation}")]
    BatchRejected {
        partition: String,
        index: usize,
        violation: RowViolation,
    },

    /// Stored data is unreadable or violates row invariants.
    #[error("partition '{partition}' is corrupt: {reason}")]
    PartitionCorruption { partition: String, reason: String },

    #[error("partition '{0}' is not in the catalog")]
    PartitionNotFound(String),

    /// An encrypted partition was accessed without a configured key.
    #[error("partition '{partition}' is encrypted and no partition key is configured")]
    EncryptionKeyMissing { partition: String },

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("read rejected: {0}")]
    ReadRejected(String),

    /// The caller's deadline passed while reading.
    #[error("deadline exceeded while reading partition")]
    DeadlineExceeded,
}

/// Which datasets are sealed at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionPolicy {
    #[default]
    None,
    Options,
    All,
}

impl EncryptionPolicy {
    pub fn applies_to(self, dataset: Dataset) -> bool {
        match self {
            Self::None => false,
            Self::Options => dataset == Dataset::Options,
            Self::All => true,
        }
    }
}

impl FromStr for EncryptionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "options" => Ok(Self::Options),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown encryption policy '{other}' (expected none, options or all)"
            )),
        }
    }
}

/// Configuration for the warehouse.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory holding the catalog and partition files.
    pub home: PathBuf,
    /// Maximum idle connections kept per database file.
    pub max_pool_size: usize,
    pub encryption_key: Option<EncryptionKey>,
    pub encryption: EncryptionPolicy,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at(resolve_tickvault_home())
    }
}

impl WarehouseConfig {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            max_pool_size: 4,
            encryption_key: None,
            encryption: EncryptionPolicy::None,
        }
    }
}

struct WarehouseInner {
    config: WarehouseConfig,
    catalog: Catalog,
    cipher: Option<RowCipher>,
    files: Mutex<HashMap<String, Arc<PartitionFile>>>,
}

/// The partition store.
#[derive(Clone)]
pub struct Warehouse {
    inner: Arc<WarehouseInner>,
}

impl std::fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warehouse")
            .field("home", &self.inner.config.home)
            .field("encryption", &self.inner.config.encryption)
            .finish()
    }
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        fs::create_dir_all(config.home.join("partitions"))?;
        let catalog = Catalog::open(&config.home, config.max_pool_size)?;
        let cipher = config
            .encryption_key
            .as_ref()
            .map(RowCipher::new)
            .transpose()?;
        Ok(Self {
            inner: Arc::new(WarehouseInner {
                config,
                catalog,
                cipher,
                files: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn home(&self) -> &Path {
        self.inner.config.home.as_path()
    }

    /// Every catalogued partition.
    pub fn partitions(&self) -> Vec<PartitionInfo> {
        self.inner.catalog.snapshot()
    }

    pub fn partition(&self, id: &str) -> Option<PartitionInfo> {
        self.inner.catalog.get(id)
    }

    /// Partitions intersecting `range`, in precedence order (highest generation first).
    pub fn resolve(&self, symbol: &str, dataset: Dataset, range: &DateRange) -> Vec<PartitionInfo> {
        self.inner.catalog.resolve(symbol, dataset, range)
    }

    /// Create the catalog entry and file for `key` if they do not exist.
    pub fn ensure_partition(&self, key: &PartitionKey) -> Result<PartitionInfo, WarehouseError> {
        if let Some(existing) = self.inner.catalog.get(&key.id()) {
            return Ok(existing);
        }
        let encrypted = self.inner.config.encryption.applies_to(key.dataset);
        if encrypted && self.inner.cipher.is_none() {
            return Err(WarehouseError::EncryptionKeyMissing { partition: key.id() });
        }

        let id = key.id();
        {
            let mut files = self.lock_files();
            if !files.contains_key(&id) {
                let path = self.home().join(key.relative_path());
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let pool = DuckDbConnectionManager::open(&path, self.inner.config.max_pool_size)?;
                {
                    let connection = pool.acquire()?;
                    migrations::apply_partition_schema(&connection, &id, key.dataset, encrypted)?;
                }
                files.insert(id, Arc::new(PartitionFile::new(pool)));
            }
        }

        self.inner.catalog.register(key, encrypted)
    }

    /// Import a sorted, deduplicated batch of bars into one partition.
    ///
    /// The whole batch is validated before a transaction is opened; the
    /// write is a single transaction of idempotent upserts.
    pub fn import_bars(
        &self,
        partition_id: &str,
        rows: &[BarRecord],
        source: &str,
    ) -> Result<ImportReport, WarehouseError> {
        let info = self.require_partition(partition_id)?;
        if !info.dataset.is_bars() {
            return Err(WarehouseError::ReadRejected(format!(
                "partition '{partition_id}' does not hold bars"
            )));
        }
        validate_bar_batch(&info, rows)?;
        self.import_with(&info, rows.len(), source, |connection, cipher| {
            partition::insert_bars(connection, &info, cipher, rows)
        })
    }

    /// Import a batch of option contracts sorted by `(expiry, strike, right)`.
    pub fn import_options(
        &self,
        partition_id: &str,
        rows: &[OptionRecord],
        source: &str,
    ) -> Result<ImportReport, WarehouseError> {
        let info = self.require_partition(partition_id)?;
        if info.dataset != Dataset::Options {
            return Err(WarehouseError::ReadRejected(format!(
                "partition '{partition_id}' does not hold options"
            )));
        }
        validate_option_batch(&info, rows)?;
        self.import_with(&info, rows.len(), source, |connection, cipher| {
            partition::insert_options(connection, &info, cipher, rows)
        })
    }

    /// Route a sorted batch of bars into default-window partitions.
    ///
    /// The batch is checked as a whole first. Each window chunk commits
    /// atomically on its own.
    pub fn write_bars(
        &self,
        symbol: &str,
        dataset: Dataset,
        rows: &[BarRecord],
        source: &str,
    ) -> Result<Vec<ImportReport>, WarehouseError> {
        if !dataset.is_bars() {
            return Err(WarehouseError::ReadRejected(format!(
                "dataset '{dataset}' does not hold bars"
            )));
        }
        let batch_id = format!("{symbol}:{dataset}:batch");
        let mut chunks: Vec<(DateRange, usize, usize)> = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            reject_at(&batch_id, index, check_bar(row))?;
            if index > 0 && rows[index - 1].ts >= row.ts {
                reject_at(&batch_id, index, Err(RowViolation::NotStrictlyAscending))?;
            }
            let date = date_of_unix(row.ts).ok_or_else(|| WarehouseError::BatchRejected {
                partition: batch_id.clone(),
                index,
                violation: RowViolation::NonFinite { field: "ts" },
            })?;
            let window = dataset.window_for(date);
            match chunks.last_mut() {
                Some((range, _, end)) if *range == window => *end = index + 1,
                _ => chunks.push((window, index, index + 1)),
            }
        }

        let mut reports = Vec::with_capacity(chunks.len());
        for (range, start, end) in chunks {
            let info = self.ensure_partition(&PartitionKey::new(symbol, dataset, range))?;
            reports.push(self.import_bars(&info.id, &rows[start..end], source)?);
        }
        Ok(reports)
    }

    /// Route a sorted batch of option contracts into monthly expiry partitions.
    pub fn write_options(
        &self,
        symbol: &str,
        rows: &[OptionRecord],
        source: &str,
    ) -> Result<Vec<ImportReport>, WarehouseError> {
        let batch_id = format!("{symbol}:options:batch");
        let mut chunks: Vec<(DateRange, usize, usize)> = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            reject_at(&batch_id, index, check_option(row))?;
            if index > 0 && rows[index - 1].key() >= row.key() {
                reject_at(&batch_id, index, Err(RowViolation::NotStrictlyAscending))?;
            }
            let window = Dataset::Options.window_for(row.expiry);
            match chunks.last_mut() {
                Some((range, _, end)) if *range == window => *end = index + 1,
                _ => chunks.push((window, index, index + 1)),
            }
        }

        let mut reports = Vec::with_capacity(chunks.len());
        for (range, start, end) in chunks {
            let info = self.ensure_partition(&PartitionKey::new(symbol, Dataset::Options, range))?;
            reports.push(self.import_options(&info.id, &rows[start..end], source)?);
        }
        Ok(reports)
    }

    /// Bars of one partition with `from_ts <= ts <= to_ts`, ascending.
    ///
    /// Rows that cannot be decoded are reported as corruption, never skipped.
    pub fn read_bars(
        &self,
        info: &PartitionInfo,
        from_ts: i64,
        to_ts: i64,
        guardrails: ReadGuardrails,
    ) -> Result<Vec<BarRecord>, WarehouseError> {
        let (lo, hi) = info.range.unix_bounds();
        let (lo, hi) = (lo.max(from_ts), hi.min(to_ts));
        if lo > hi {
            return Ok(Vec::new());
        }
        let file = self.file_for(info)?;
        let connection = file.pool.acquire()?;
        let mut bars = Vec::new();
        partition::scan_bars(
            &connection,
            info,
            self.inner.cipher.as_ref(),
            (lo, hi),
            guardrails,
            |row| match row {
                Ok(bar) => {
                    bars.push(bar);
                    Ok(())
                }
                Err(fault) => Err(corruption(info, fault)),
            },
        )?;
        Ok(bars)
    }

    /// Option chain for one expiry from one partition.
    pub fn read_options(
        &self,
        info: &PartitionInfo,
        expiry: Date,
        guardrails: ReadGuardrails,
    ) -> Result<Vec<OptionRecord>, WarehouseError> {
        if !info.range.contains(expiry) {
            return Ok(Vec::new());
        }
        let file = self.file_for(info)?;
        let connection = file.pool.acquire()?;
        let expiry = format_date(expiry);
        let mut chain = Vec::new();
        partition::scan_options(
            &connection,
            info,
            self.inner.cipher.as_ref(),
            Some(expiry.as_str()),
            guardrails,
            |row| match row {
                Ok(contract) => {
                    chain.push(contract);
                    Ok(())
                }
                Err(fault) => Err(corruption(info, fault)),
            },
        )?;
        Ok(chain)
    }

    /// Audit one partition. Problems are reported, not raised.
    pub fn verify_integrity(&self, partition_id: &str) -> Result<IntegrityReport, WarehouseError> {
        let info = self.require_partition(partition_id)?;
        if !info.path.exists() {
            return Ok(integrity::missing_file(&info));
        }
        let file = self.file_for(&info)?;
        let report = integrity::verify(&info, &file, self.inner.cipher.as_ref())?;
        if !report.ok {
            tracing::warn!(partition = %info.id, issues = report.issues.len(), "integrity check failed");
        }
        Ok(report)
    }

    /// Audit every partition, or those of one symbol.
    pub fn verify_all(&self, symbol: Option<&str>) -> Result<Vec<IntegrityReport>, WarehouseError> {
        self.partitions()
            .into_iter()
            .filter(|info| symbol.is_none_or(|symbol| info.symbol == symbol))
            .map(|info| self.verify_integrity(&info.id))
            .collect()
    }

    fn require_partition(&self, partition_id: &str) -> Result<PartitionInfo, WarehouseError> {
        self.inner
            .catalog
            .get(partition_id)
            .ok_or_else(|| WarehouseError::PartitionNotFound(partition_id.to_string()))
    }

    fn import_with<F>(
        &self,
        info: &PartitionInfo,
        rows_written: usize,
        source: &str,
        insert: F,
    ) -> Result<ImportReport, WarehouseError>
    where
        F: FnOnce(&Connection, Option<&RowCipher>) -> Result<(), WarehouseError>,
    {
        let started = Instant::now();
        if rows_written == 0 {
            return Ok(ImportReport {
                partition_id: info.id.clone(),
                rows_written: 0,
                row_count: info.row_count,
                generation: info.generation,
            });
        }

        let file = self.file_for(info)?;
        let _guard = file.lock_writes();
        let connection = file.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = insert(&connection, self.inner.cipher.as_ref());
        finalize_transaction(&connection, result)?;
        let row_count = partition::count_rows(&connection, info)?;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let updated =
            self.inner
                .catalog
                .record_import(&info.id, row_count, source, rows_written, latency_ms)?;
        tracing::info!(
            partition = %updated.id,
            rows = rows_written,
            row_count,
            generation = updated.generation,
            source,
            "partition import committed"
        );
        Ok(ImportReport {
            partition_id: updated.id,
            rows_written,
            row_count,
            generation: updated.generation,
        })
    }

    fn file_for(&self, info: &PartitionInfo) -> Result<Arc<PartitionFile>, WarehouseError> {
        let mut files = self.lock_files();
        if let Some(file) = files.get(&info.id) {
            return Ok(Arc::clone(file));
        }
        if !info.path.exists() {
            return Err(WarehouseError::PartitionCorruption {
                partition: info.id.clone(),
                reason: format!("partition file missing: {}", info.path.display()),
            });
        }
        let pool = DuckDbConnectionManager::open(&info.path, self.inner.config.max_pool_size)?;
        let file = Arc::new(PartitionFile::new(pool));
        files.insert(info.id.clone(), Arc::clone(&file));
        Ok(file)
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<String, Arc<PartitionFile>>> {
        self.inner.files.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("partition file registry poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn validate_bar_batch(info: &PartitionInfo, rows: &[BarRecord]) -> Result<(), WarehouseError> {
    for (index, row) in rows.iter().enumerate() {
        reject_at(&info.id, index, check_bar(row))?;
        if index > 0 && rows[index - 1].ts >= row.ts {
            reject_at(&info.id, index, Err(RowViolation::NotStrictlyAscending))?;
        }
        let inside = date_of_unix(row.ts).is_some_and(|date| info.range.contains(date));
        if !inside {
            reject_at(&info.id, index, Err(outside(info, date_of_unix(row.ts))))?;
        }
    }
    Ok(())
}

fn validate_option_batch(info: &PartitionInfo, rows: &[OptionRecord]) -> Result<(), WarehouseError> {
    for (index, row) in rows.iter().enumerate() {
        reject_at(&info.id, index, check_option(row))?;
        if index > 0 && rows[index - 1].key() >= row.key() {
            reject_at(&info.id, index, Err(RowViolation::NotStrictlyAscending))?;
        }
        if !info.range.contains(row.expiry) {
            reject_at(&info.id, index, Err(outside(info, Some(row.expiry))))?;
        }
    }
    Ok(())
}

fn outside(info: &PartitionInfo, date: Option<Date>) -> RowViolation {
    RowViolation::OutsidePartition {
        date: date.map(format_date).unwrap_or_else(|| String::from("invalid")),
        start: format_date(info.range.start),
        end: format_date(info.range.end),
    }
}

fn reject_at(
    partition: &str,
    index: usize,
    check: Result<(), RowViolation>,
) -> Result<(), WarehouseError> {
    check.map_err(|violation| WarehouseError::BatchRejected {
        partition: partition.to_string(),
        index,
        violation,
    })
}

fn corruption(info: &PartitionInfo, fault: partition::RowFault) -> WarehouseError {
    tracing::warn!(partition = %info.id, row = %fault.key, reason = %fault.reason, "corrupt row");
    WarehouseError::PartitionCorruption {
        partition: info.id.clone(),
        reason: format!("row {}: {}", fault.key, fault.reason),
    }
}

/// Commit on success, roll back on failure.
pub(crate) fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn resolve_tickvault_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKVAULT_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickvault");
    }

    PathBuf::from(".tickvault")
}
