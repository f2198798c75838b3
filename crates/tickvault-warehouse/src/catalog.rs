//! Partition catalog: the `partitions` table in `catalog.duckdb`, mirrored
//! in memory so query resolution never touches disk.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ::duckdb::{params, Connection};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::duckdb::DuckDbConnectionManager;
use crate::migrations::apply_catalog_migrations;
use crate::records::{format_date, parse_date, Dataset, DateRange, PartitionInfo, PartitionKey};
use crate::WarehouseError;

pub(crate) struct Catalog {
    home: PathBuf,
    pool: DuckDbConnectionManager,
    entries: RwLock<Vec<PartitionInfo>>,
    write_lock: Mutex<()>,
}

impl Catalog {
    pub fn open(home: &Path, max_pool_size: usize) -> Result<Self, WarehouseError> {
        let pool = DuckDbConnectionManager::open(home.join("catalog.duckdb"), max_pool_size)?;
        let entries = {
            let connection = pool.acquire()?;
            apply_catalog_migrations(&connection)?;
            load_entries(&connection, home)?
        };
        tracing::debug!(partitions = entries.len(), home = %home.display(), "catalog loaded");
        Ok(Self {
            home: home.to_path_buf(),
            pool,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Vec<PartitionInfo> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<PartitionInfo> {
        self.read().iter().find(|entry| entry.id == id).cloned()
    }

    /// Partitions of `(symbol, dataset)` intersecting `range`, highest
    /// generation first.
    pub fn resolve(&self, symbol: &str, dataset: Dataset, range: &DateRange) -> Vec<PartitionInfo> {
        let mut matches = self
            .read()
            .iter()
            .filter(|entry| {
                entry.symbol == symbol && entry.dataset == dataset && entry.range.intersects(range)
            })
            .cloned()
            .collect::<Vec<_>>();
        matches.sort_by(|left, right| right.generation.cmp(&left.generation));
        matches
    }

    /// Insert a catalog row for `key` unless one exists.
    pub fn register(&self, key: &PartitionKey, encrypted: bool) -> Result<PartitionInfo, WarehouseError> {
        let _guard = self.lock_writes();
        let id = key.id();
        if let Some(existing) = self.get(&id) {
            return Ok(existing);
        }

        let relative = key.relative_path();
        let now = now_rfc3339();
        let connection = self.pool.acquire()?;
        connection.execute(
            "INSERT INTO partitions \
             (id, symbol, dataset, start_date, end_date, path, encrypted, row_count, generation, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
            params![
                id,
                key.symbol,
                key.dataset.as_str(),
                format_date(key.range.start),
                format_date(key.range.end),
                relative.to_string_lossy().into_owned(),
                encrypted,
                now,
                now
            ],
        )?;

        let info = PartitionInfo {
            id,
            symbol: key.symbol.clone(),
            dataset: key.dataset,
            range: key.range,
            path: self.home.join(relative),
            encrypted,
            row_count: 0,
            generation: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        self.write().push(info.clone());
        tracing::info!(partition = %info.id, encrypted, "partition created");
        Ok(info)
    }

    /// Refresh row count and bump the generation after a committed import.
    pub fn record_import(
        &self,
        id: &str,
        row_count: u64,
        source: &str,
        rows_written: usize,
        latency_ms: u64,
    ) -> Result<PartitionInfo, WarehouseError> {
        let _guard = self.lock_writes();
        let mut info = self
            .get(id)
            .ok_or_else(|| WarehouseError::PartitionNotFound(id.to_string()))?;
        let generation = self
            .read()
            .iter()
            .map(|entry| entry.generation)
            .max()
            .unwrap_or(0)
            + 1;
        let now = now_rfc3339();

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            connection.execute(
                "UPDATE partitions SET row_count = ?, generation = ?, updated_at = ? WHERE id = ?",
                params![
                    i64::try_from(row_count).unwrap_or(i64::MAX),
                    i64::try_from(generation).unwrap_or(i64::MAX),
                    now,
                    id
                ],
            )?;
            connection.execute(
                "INSERT INTO ingest_log (partition_id, source, dataset, status, rows, latency_ms) \
                 VALUES (?, ?, ?, 'ok', ?, ?)",
                params![
                    id,
                    source,
                    info.dataset.as_str(),
                    i64::try_from(rows_written).unwrap_or(i64::MAX),
                    i64::try_from(latency_ms).unwrap_or(i64::MAX)
                ],
            )?;
            Ok(())
        })();
        crate::finalize_transaction(&connection, result)?;

        info.row_count = row_count;
        info.generation = generation;
        info.updated_at = now;
        if let Some(entry) = self.write().iter_mut().find(|entry| entry.id == id) {
            *entry = info.clone();
        }
        Ok(info)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("catalog write lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PartitionInfo>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("catalog cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<PartitionInfo>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("catalog cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn load_entries(connection: &Connection, home: &Path) -> Result<Vec<PartitionInfo>, WarehouseError> {
    let mut statement = connection.prepare(
        "SELECT id, symbol, dataset, start_date, end_date, path, encrypted, row_count, generation, \
         created_at, updated_at FROM partitions ORDER BY id",
    )?;
    let mut rows = statement.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let dataset: String = row.get(2)?;
        let start: String = row.get(3)?;
        let end: String = row.get(4)?;
        let path: String = row.get(5)?;
        let row_count: i64 = row.get(7)?;
        let generation: i64 = row.get(8)?;

        let dataset = dataset.parse::<Dataset>().map_err(|reason| {
            WarehouseError::PartitionCorruption {
                partition: id.clone(),
                reason,
            }
        })?;
        let range = parse_date(&start)
            .zip(parse_date(&end))
            .and_then(|(start, end)| DateRange::new(start, end))
            .ok_or_else(|| WarehouseError::PartitionCorruption {
                partition: id.clone(),
                reason: format!("invalid catalog range {start}..{end}"),
            })?;

        entries.push(PartitionInfo {
            symbol: row.get(1)?,
            dataset,
            range,
            path: home.join(path),
            encrypted: row.get(6)?,
            row_count: u64::try_from(row_count).unwrap_or_default(),
            generation: u64::try_from(generation).unwrap_or_default(),
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            id,
        });
    }
    Ok(entries)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
