//! Out-of-band partition audit. Never used on the query path.

use crate::crypto::RowCipher;
use crate::migrations::{row_table, table_exists};
use crate::partition::{count_rows, meta_value, scan_bars, scan_options, PartitionFile, ReadGuardrails};
use crate::records::{
    check_bar, check_option, date_of_unix, format_date, IntegrityReport, PartitionInfo,
};
use crate::WarehouseError;

const MAX_ROW_ISSUES: usize = 20;

pub(crate) fn verify(
    info: &PartitionInfo,
    file: &PartitionFile,
    cipher: Option<&RowCipher>,
) -> Result<IntegrityReport, WarehouseError> {
    let mut issues = Vec::new();
    let connection = file.pool.acquire()?;

    let table = row_table(info.dataset, info.encrypted);
    if !table_exists(&connection, table)? {
        issues.push(format!("missing row table '{table}'"));
        return Ok(report(info, 0, issues));
    }

    match meta_value(&connection, "partition_id") {
        Ok(Some(stored)) if stored == info.id => {}
        Ok(Some(stored)) => issues.push(format!("file belongs to partition '{stored}'")),
        Ok(None) | Err(_) => issues.push(String::from("partition metadata missing")),
    }

    let row_count = count_rows(&connection, info)?;
    if row_count != info.row_count {
        issues.push(format!(
            "row count mismatch: catalog={} file={row_count}",
            info.row_count
        ));
    }

    if info.encrypted && cipher.is_none() {
        issues.push(String::from(
            "encryption key not configured; sealed rows not verified",
        ));
        return Ok(report(info, row_count, issues));
    }

    let mut row_issues = Vec::new();
    let mut note = |issue: String| row_issues.push(issue);
    if info.dataset.is_bars() {
        let mut previous: Option<i64> = None;
        scan_bars(
            &connection,
            info,
            cipher,
            (i64::MIN, i64::MAX),
            ReadGuardrails::default(),
            |row| {
                match row {
                    Ok(bar) => {
                        if let Err(violation) = check_bar(&bar) {
                            note(format!("row {}: {violation}", bar.ts));
                        }
                        if !date_of_unix(bar.ts).is_some_and(|date| info.range.contains(date)) {
                            note(format!("row {}: outside partition range", bar.ts));
                        }
                        if previous.is_some_and(|prev| prev >= bar.ts) {
                            note(format!("row {}: timestamps not strictly increasing", bar.ts));
                        }
                        previous = Some(bar.ts);
                    }
                    Err(fault) => note(format!("row {}: {}", fault.key, fault.reason)),
                }
                Ok(())
            },
        )?;
    } else {
        scan_options(
            &connection,
            info,
            cipher,
            None,
            ReadGuardrails::default(),
            |row| {
                match row {
                    Ok(contract) => {
                        let key = format!(
                            "{}|{}|{}",
                            format_date(contract.expiry),
                            contract.strike,
                            contract.right
                        );
                        if let Err(violation) = check_option(&contract) {
                            note(format!("row {key}: {violation}"));
                        }
                        if !info.range.contains(contract.expiry) {
                            note(format!("row {key}: outside partition range"));
                        }
                    }
                    Err(fault) => note(format!("row {}: {}", fault.key, fault.reason)),
                }
                Ok(())
            },
        )?;
    }

    let extra = row_issues.len().saturating_sub(MAX_ROW_ISSUES);
    issues.extend(row_issues.into_iter().take(MAX_ROW_ISSUES));
    if extra > 0 {
        issues.push(format!("... and {extra} more row issues"));
    }

    Ok(report(info, row_count, issues))
}

pub(crate) fn missing_file(info: &PartitionInfo) -> IntegrityReport {
    report(
        info,
        0,
        vec![format!("partition file missing: {}", info.path.display())],
    )
}

fn report(info: &PartitionInfo, row_count: u64, issues: Vec<String>) -> IntegrityReport {
    IntegrityReport {
        partition_id: info.id.clone(),
        ok: issues.is_empty(),
        row_count,
        issues,
    }
}
