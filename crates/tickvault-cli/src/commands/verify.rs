use tickvault_core::quality::audit_partitions;
use tickvault_core::{CoreError, EnvelopeError, ErrorCode};

use super::{failure, from_core, CommandResult, Parameters};
use crate::service::Service;

/// Out-of-band audit. Any failing partition turns the response into a
/// `PARTITION_CORRUPTION` error naming the partitions.
pub async fn run(service: &Service, parameters: Parameters<'_>) -> Result<CommandResult, EnvelopeError> {
    let symbol = parameters.optional_symbol()?;
    let warehouse = service.engine().warehouse().clone();
    let report = tokio::task::spawn_blocking(move || audit_partitions(&warehouse, symbol.as_ref()))
        .await
        .map_err(|join| from_core(CoreError::Internal(format!("audit task failed: {join}"))))?
        .map_err(|error| from_core(CoreError::from(error)))?;

    if !report.ok() {
        let failed = report
            .reports
            .iter()
            .filter(|partition| !partition.ok)
            .map(|partition| format!("{} ({})", partition.partition_id, partition.issues.join("; ")))
            .collect::<Vec<_>>();
        tracing::warn!(failed = failed.len(), "partition audit found corruption");
        return Err(failure(
            ErrorCode::PartitionCorruption,
            format!(
                "{} of {} partitions failed verification: {}",
                report.partitions_failed,
                report.partitions_checked,
                failed.join(", ")
            ),
        )
        .with_hint("re-acquire the affected ranges to write fresh partitions"));
    }

    CommandResult::new(&report, report.partitions_checked)
}
