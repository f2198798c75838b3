//! Row access inside a single partition file.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use ::duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::crypto::{row_aad, RowCipher, SealedRow};
use crate::duckdb::DuckDbConnectionManager;
use crate::migrations::row_table;
use crate::records::{format_date, parse_date, BarRecord, OptionRecord, OptionRight, PartitionInfo};
use crate::WarehouseError;

/// Limits applied while iterating partition rows.
#[derive(Debug, Clone, Copy)]
pub struct ReadGuardrails {
    pub max_rows: usize,
    pub deadline: Option<Instant>,
}

impl Default for ReadGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 5_000_000,
            deadline: None,
        }
    }
}

impl ReadGuardrails {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    fn check(&self, rows_seen: usize) -> Result<(), WarehouseError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(WarehouseError::DeadlineExceeded);
            }
        }
        if rows_seen > self.max_rows {
            return Err(WarehouseError::ReadRejected(format!(
                "read exceeds max_rows={}",
                self.max_rows
            )));
        }
        Ok(())
    }
}

/// A row that could not be materialised from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowFault {
    pub key: String,
    pub reason: String,
}

/// Open partition file: its connection pool and its write lock.
pub(crate) struct PartitionFile {
    pub pool: DuckDbConnectionManager,
    write_lock: Mutex<()>,
}

impl PartitionFile {
    pub fn new(pool: DuckDbConnectionManager) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(path = %self.pool.db_path().display(), "partition write lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[derive(Serialize, Deserialize)]
struct BarPayload {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

#[derive(Serialize, Deserialize)]
struct OptionPayload {
    bid: f64,
    ask: f64,
    mid: Option<f64>,
    delta: Option<f64>,
    gamma: Option<f64>,
    theta: Option<f64>,
    vega: Option<f64>,
    iv: Option<f64>,
}

pub(crate) fn bar_row_key(ts: i64) -> String {
    ts.to_string()
}

pub(crate) fn option_row_key(expiry: &str, strike: f64, right: &str) -> String {
    format!("{expiry}|{strike}|{right}")
}

pub(crate) fn require_cipher<'a>(
    info: &PartitionInfo,
    cipher: Option<&'a RowCipher>,
) -> Result<&'a RowCipher, WarehouseError> {
    cipher.ok_or_else(|| WarehouseError::EncryptionKeyMissing {
        partition: info.id.clone(),
    })
}

pub(crate) fn insert_bars(
    connection: &Connection,
    info: &PartitionInfo,
    cipher: Option<&RowCipher>,
    rows: &[BarRecord],
) -> Result<(), WarehouseError> {
    if info.encrypted {
        let cipher = require_cipher(info, cipher)?;
        let mut statement = connection
            .prepare("INSERT OR REPLACE INTO bars_sealed (ts, nonce, payload) VALUES (?, ?, ?)")?;
        for row in rows {
            let payload = serde_json::to_vec(&BarPayload {
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            })?;
            let sealed = cipher.seal(&row_aad(&info.id, &bar_row_key(row.ts)), &payload)?;
            statement.execute(params![row.ts, sealed.nonce, sealed.payload])?;
        }
    } else {
        let mut statement = connection.prepare(
            "INSERT OR REPLACE INTO bars (ts, open, high, low, close, volume) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            statement.execute(params![
                row.ts, row.open, row.high, row.low, row.close, row.volume
            ])?;
        }
    }
    Ok(())
}

pub(crate) fn insert_options(
    connection: &Connection,
    info: &PartitionInfo,
    cipher: Option<&RowCipher>,
    rows: &[OptionRecord],
) -> Result<(), WarehouseError> {
    if info.encrypted {
        let cipher = require_cipher(info, cipher)?;
        let mut statement = connection.prepare(
            "INSERT OR REPLACE INTO options_sealed (expiry, strike, \"right\", nonce, payload) \
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            let expiry = format_date(row.expiry);
            let right = row.right.as_str();
            let payload = serde_json::to_vec(&OptionPayload {
                bid: row.bid,
                ask: row.ask,
                mid: row.mid,
                delta: row.delta,
                gamma: row.gamma,
                theta: row.theta,
                vega: row.vega,
                iv: row.iv,
            })?;
            let aad = row_aad(&info.id, &option_row_key(&expiry, row.strike, right));
            let sealed = cipher.seal(&aad, &payload)?;
            statement.execute(params![expiry, row.strike, right, sealed.nonce, sealed.payload])?;
        }
    } else {
        let mut statement = connection.prepare(
            "INSERT OR REPLACE INTO options \
             (expiry, strike, \"right\", bid, ask, mid, delta, gamma, theta, vega, iv) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            statement.execute(params![
                format_date(row.expiry),
                row.strike,
                row.right.as_str(),
                row.bid,
                row.ask,
                row.mid,
                row.delta,
                row.gamma,
                row.theta,
                row.vega,
                row.iv
            ])?;
        }
    }
    Ok(())
}

pub(crate) fn count_rows(
    connection: &Connection,
    info: &PartitionInfo,
) -> Result<u64, WarehouseError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}",
        row_table(info.dataset, info.encrypted)
    );
    let count: i64 = connection.query_row(sql.as_str(), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Visit bars with `lo <= ts <= hi` in ascending order.
///
/// Undecodable rows are handed to `visit` as faults; storage failures and
/// guardrail violations abort the scan.
pub(crate) fn scan_bars<F>(
    connection: &Connection,
    info: &PartitionInfo,
    cipher: Option<&RowCipher>,
    (lo, hi): (i64, i64),
    guardrails: ReadGuardrails,
    mut visit: F,
) -> Result<(), WarehouseError>
where
    F: FnMut(Result<BarRecord, RowFault>) -> Result<(), WarehouseError>,
{
    let mut seen = 0usize;
    if info.encrypted {
        let cipher = require_cipher(info, cipher)?;
        let mut statement = connection.prepare(
            "SELECT ts, nonce, payload FROM bars_sealed WHERE ts BETWEEN ? AND ? ORDER BY ts",
        )?;
        let mut rows = statement.query(params![lo, hi])?;
        while let Some(row) = rows.next()? {
            seen += 1;
            guardrails.check(seen)?;
            let ts: i64 = row.get(0)?;
            let sealed = SealedRow {
                nonce: row.get(1)?,
                payload: row.get(2)?,
            };
            let key = bar_row_key(ts);
            let decoded = cipher
                .open(&row_aad(&info.id, &key), &sealed)
                .ok_or("authentication failed")
                .and_then(|plain| {
                    serde_json::from_slice::<BarPayload>(&plain).map_err(|_| "payload undecodable")
                })
                .map(|payload| BarRecord {
                    ts,
                    open: payload.open,
                    high: payload.high,
                    low: payload.low,
                    close: payload.close,
                    volume: payload.volume,
                })
                .map_err(|reason| RowFault {
                    key,
                    reason: reason.to_string(),
                });
            visit(decoded)?;
        }
    } else {
        let mut statement = connection.prepare(
            "SELECT ts, open, high, low, close, volume FROM bars \
             WHERE ts BETWEEN ? AND ? ORDER BY ts",
        )?;
        let mut rows = statement.query(params![lo, hi])?;
        while let Some(row) = rows.next()? {
            seen += 1;
            guardrails.check(seen)?;
            visit(Ok(BarRecord {
                ts: row.get(0)?,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get(5)?,
            }))?;
        }
    }
    Ok(())
}

/// Visit option rows, optionally restricted to one expiry, in
/// `(expiry, strike, right)` order.
pub(crate) fn scan_options<F>(
    connection: &Connection,
    info: &PartitionInfo,
    cipher: Option<&RowCipher>,
    expiry: Option<&str>,
    guardrails: ReadGuardrails,
    mut visit: F,
) -> Result<(), WarehouseError>
where
    F: FnMut(Result<OptionRecord, RowFault>) -> Result<(), WarehouseError>,
{
    let filter = if expiry.is_some() {
        "WHERE expiry = ?"
    } else {
        ""
    };
    let mut seen = 0usize;
    if info.encrypted {
        let cipher = require_cipher(info, cipher)?;
        let sql = format!(
            "SELECT expiry, strike, \"right\", nonce, payload FROM options_sealed {filter} \
             ORDER BY expiry, strike, \"right\""
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = match expiry {
            Some(expiry) => statement.query(params![expiry])?,
            None => statement.query([])?,
        };
        while let Some(row) = rows.next()? {
            seen += 1;
            guardrails.check(seen)?;
            let expiry_text: String = row.get(0)?;
            let strike: f64 = row.get(1)?;
            let right_text: String = row.get(2)?;
            let sealed = SealedRow {
                nonce: row.get(3)?,
                payload: row.get(4)?,
            };
            let key = option_row_key(&expiry_text, strike, &right_text);
            let decoded = decode_option_key(&expiry_text, &right_text)
                .and_then(|(expiry, right)| {
                    let plain = cipher
                        .open(&row_aad(&info.id, &key), &sealed)
                        .ok_or_else(|| String::from("authentication failed"))?;
                    let payload = serde_json::from_slice::<OptionPayload>(&plain)
                        .map_err(|_| String::from("payload undecodable"))?;
                    Ok(OptionRecord {
                        expiry,
                        strike,
                        right,
                        bid: payload.bid,
                        ask: payload.ask,
                        mid: payload.mid,
                        delta: payload.delta,
                        gamma: payload.gamma,
                        theta: payload.theta,
                        vega: payload.vega,
                        iv: payload.iv,
                    })
                })
                .map_err(|reason| RowFault { key, reason });
            visit(decoded)?;
        }
    } else {
        let sql = format!(
            "SELECT expiry, strike, \"right\", bid, ask, mid, delta, gamma, theta, vega, iv \
             FROM options {filter} ORDER BY expiry, strike, \"right\""
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = match expiry {
            Some(expiry) => statement.query(params![expiry])?,
            None => statement.query([])?,
        };
        while let Some(row) = rows.next()? {
            seen += 1;
            guardrails.check(seen)?;
            let expiry_text: String = row.get(0)?;
            let strike: f64 = row.get(1)?;
            let right_text: String = row.get(2)?;
            let key = option_row_key(&expiry_text, strike, &right_text);
            let decoded = match decode_option_key(&expiry_text, &right_text) {
                Ok((expiry, right)) => Ok(OptionRecord {
                    expiry,
                    strike,
                    right,
                    bid: row.get(3)?,
                    ask: row.get(4)?,
                    mid: row.get(5)?,
                    delta: row.get(6)?,
                    gamma: row.get(7)?,
                    theta: row.get(8)?,
                    vega: row.get(9)?,
                    iv: row.get(10)?,
                }),
                Err(reason) => Err(RowFault { key, reason }),
            };
            visit(decoded)?;
        }
    }
    Ok(())
}

fn decode_option_key(
    expiry: &str,
    right: &str,
) -> Result<(time::Date, OptionRight), String> {
    let expiry = parse_date(expiry).ok_or_else(|| format!("invalid expiry '{expiry}'"))?;
    let right = right.parse::<OptionRight>()?;
    Ok((expiry, right))
}

/// Value stored under `key` in the partition metadata table.
pub(crate) fn meta_value(connection: &Connection, key: &str) -> Result<Option<String>, WarehouseError> {
    let mut statement = connection.prepare("SELECT value FROM partition_meta WHERE key = ?")?;
    let mut rows = statement.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}
