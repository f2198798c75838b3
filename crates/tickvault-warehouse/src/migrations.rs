use ::duckdb::{params, Connection};

use crate::records::Dataset;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const CATALOG_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_partitions",
        sql: r#"
CREATE TABLE IF NOT EXISTS partitions (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    dataset TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    path TEXT NOT NULL,
    encrypted BOOLEAN NOT NULL,
    row_count BIGINT NOT NULL DEFAULT 0,
    generation BIGINT NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_log (
    partition_id TEXT NOT NULL,
    source TEXT NOT NULL,
    dataset TEXT NOT NULL,
    status TEXT NOT NULL,
    rows BIGINT NOT NULL,
    latency_ms BIGINT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_partitions_symbol_dataset ON partitions(symbol, dataset);
CREATE INDEX IF NOT EXISTS idx_ingest_log_partition ON ingest_log(partition_id, timestamp);
"#,
    },
];

pub fn apply_catalog_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in CATALOG_MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
            tracing::debug!(version = migration.version, "applied catalog migration");
        }
    }

    Ok(())
}

const BARS_PLAIN: &str = r#"
CREATE TABLE IF NOT EXISTS bars (
    ts BIGINT PRIMARY KEY,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume UBIGINT NOT NULL
);
"#;

const BARS_SEALED: &str = r#"
CREATE TABLE IF NOT EXISTS bars_sealed (
    ts BIGINT PRIMARY KEY,
    nonce BLOB NOT NULL,
    payload BLOB NOT NULL
);
"#;

const OPTIONS_PLAIN: &str = r#"
CREATE TABLE IF NOT EXISTS options (
    expiry TEXT NOT NULL,
    strike DOUBLE NOT NULL,
    "right" TEXT NOT NULL,
    bid DOUBLE NOT NULL,
    ask DOUBLE NOT NULL,
    mid DOUBLE,
    delta DOUBLE,
    gamma DOUBLE,
    theta DOUBLE,
    vega DOUBLE,
    iv DOUBLE,
    PRIMARY KEY(expiry, strike, "right")
);
"#;

const OPTIONS_SEALED: &str = r#"
CREATE TABLE IF NOT EXISTS options_sealed (
    expiry TEXT NOT NULL,
    strike DOUBLE NOT NULL,
    "right" TEXT NOT NULL,
    nonce BLOB NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY(expiry, strike, "right")
);
"#;

const PARTITION_META: &str = r#"
CREATE TABLE IF NOT EXISTS partition_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Name of the row table holding `dataset` rows in a partition file.
pub const fn row_table(dataset: Dataset, encrypted: bool) -> &'static str {
    match (dataset.is_bars(), encrypted) {
        (true, false) => "bars",
        (true, true) => "bars_sealed",
        (false, false) => "options",
        (false, true) => "options_sealed",
    }
}

/// Create the row table and metadata of a fresh partition file.
pub fn apply_partition_schema(
    connection: &Connection,
    partition_id: &str,
    dataset: Dataset,
    encrypted: bool,
) -> Result<(), ::duckdb::Error> {
    let table_sql = match row_table(dataset, encrypted) {
        "bars" => BARS_PLAIN,
        "bars_sealed" => BARS_SEALED,
        "options" => OPTIONS_PLAIN,
        _ => OPTIONS_SEALED,
    };
    connection.execute_batch(table_sql)?;
    connection.execute_batch(PARTITION_META)?;
    for (key, value) in [
        ("partition_id", partition_id),
        ("dataset", dataset.as_str()),
        ("encrypted", if encrypted { "true" } else { "false" }),
    ] {
        connection.execute(
            "INSERT OR REPLACE INTO partition_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
    }
    Ok(())
}

/// Whether a table exists in the connected database.
pub fn table_exists(connection: &Connection, table: &str) -> Result<bool, ::duckdb::Error> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
