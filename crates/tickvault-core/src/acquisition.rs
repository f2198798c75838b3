//! Acquisition pipeline: provider fallback, rate budgets, health tracking and
//! warehouse import.
//!
//! Providers are tried in ascending priority. The first call that returns
//! rows which pass validation wins; nothing is written unless a call fully
//! succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::Date;
use tickvault_warehouse::{ImportReport, Warehouse};

use crate::data_source::{
    BarsRequest, DataSource, OptionsRequest, ProviderError, ProviderErrorKind, SourceFuture,
};
use crate::domain::timestamp::iso_date;
use crate::provider_state::{ProviderStateRegistry, ProviderStatus, RateLimitStatus};
use crate::quality::{dedup_bars, dedup_chain, validate_bars, validate_chain};
use crate::{Bar, CoreError, OptionContract, Resolution, Symbol};

/// One failed provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

/// Outcome of one acquisition call. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionResult {
    pub success: bool,
    pub symbol: Symbol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(with = "iso_date")]
    pub from: Date,
    #[serde(with = "iso_date")]
    pub to: Date,
    pub bars_acquired: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts_acquired: Option<usize>,
    pub successful_providers: Vec<String>,
    pub failed_providers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
    pub partitions_written: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AcquisitionResult {
    /// Rows acquired, bars or contracts.
    pub fn rows_acquired(&self) -> usize {
        self.contracts_acquired.unwrap_or(self.bars_acquired)
    }
}

struct Routed<T> {
    winner: Option<Winner<T>>,
    failures: Vec<ProviderFailure>,
    skipped: Vec<String>,
    local_miss: bool,
    deadline_hit: bool,
}

struct Winner<T> {
    provider: String,
    local: bool,
    rows: Vec<T>,
}

/// Fallback loop over a priority-ordered provider list.
pub struct AcquisitionPipeline {
    warehouse: Warehouse,
    providers: Vec<Arc<dyn DataSource>>,
    state: Arc<ProviderStateRegistry>,
}

impl AcquisitionPipeline {
    pub fn new(
        warehouse: Warehouse,
        mut providers: Vec<Arc<dyn DataSource>>,
        state: Arc<ProviderStateRegistry>,
    ) -> Self {
        providers.sort_by_key(|provider| provider.priority());
        for provider in &providers {
            state.register(provider.name(), provider.requests_per_minute());
        }
        Self {
            warehouse,
            providers,
            state,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn DataSource>] {
        &self.providers
    }

    pub fn state(&self) -> &Arc<ProviderStateRegistry> {
        &self.state
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Snapshot of every provider's availability, health and budget.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|provider| {
                let state = self
                    .state
                    .register(provider.name(), provider.requests_per_minute());
                ProviderStatus {
                    name: provider.name().to_string(),
                    priority: provider.priority(),
                    available: provider.is_available(),
                    healthy: state.health.is_healthy(),
                    consecutive_failures: state.health.consecutive_failures(),
                    response_time_ms: state.health.last_response_ms(),
                    rate_limit: RateLimitStatus {
                        requests_remaining: state.budget.remaining(),
                        requests_per_minute: state.budget.requests_per_minute(),
                    },
                }
            })
            .collect()
    }

    /// Fetch bars from the first provider that can serve them and import them.
    ///
    /// `to < from` is an empty success; no provider is tried.
    pub async fn acquire_bars(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        from: Date,
        to: Date,
        deadline: Option<Instant>,
    ) -> Result<AcquisitionResult, CoreError> {
        let started = Instant::now();
        let mut result = AcquisitionResult {
            success: true,
            symbol: symbol.clone(),
            resolution: Some(resolution),
            from,
            to,
            bars_acquired: 0,
            contracts_acquired: None,
            successful_providers: Vec::new(),
            failed_providers: Vec::new(),
            failures: Vec::new(),
            partitions_written: Vec::new(),
            duration_ms: 0,
            error_message: None,
        };
        if to < from {
            tracing::debug!(%symbol, "empty acquisition range");
            result.duration_ms = elapsed_ms(started);
            return Ok(result);
        }

        let request = BarsRequest::new(symbol.clone(), resolution, from, to)
            .map_err(|error| CoreError::Internal(error.to_string()))?;
        let routed = self.route(deadline, &request).await;

        let Some(winner) = self.settle(&mut result, routed) else {
            result.duration_ms = elapsed_ms(started);
            return Ok(result);
        };
        result.bars_acquired = winner.rows.len();
        if !winner.local {
            let records = winner.rows.iter().map(Bar::to_record).collect::<Vec<_>>();
            let warehouse = self.warehouse.clone();
            let symbol = symbol.to_string();
            let source = winner.provider.clone();
            let reports = run_blocking(move || {
                warehouse.write_bars(&symbol, resolution.dataset(), &records, &source)
            })
            .await?;
            result.partitions_written = partition_ids(&reports);
        }
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    /// Fetch and import the option chain of one expiry.
    pub async fn acquire_options(
        &self,
        symbol: &Symbol,
        expiry: Date,
        deadline: Option<Instant>,
    ) -> Result<AcquisitionResult, CoreError> {
        let started = Instant::now();
        let mut result = AcquisitionResult {
            success: true,
            symbol: symbol.clone(),
            resolution: None,
            from: expiry,
            to: expiry,
            bars_acquired: 0,
            contracts_acquired: Some(0),
            successful_providers: Vec::new(),
            failed_providers: Vec::new(),
            failures: Vec::new(),
            partitions_written: Vec::new(),
            duration_ms: 0,
            error_message: None,
        };

        let request = OptionsRequest {
            symbol: symbol.clone(),
            expiry,
        };
        let routed = self.route(deadline, &request).await;

        let Some(winner) = self.settle(&mut result, routed) else {
            result.duration_ms = elapsed_ms(started);
            return Ok(result);
        };
        result.contracts_acquired = Some(winner.rows.len());
        if !winner.local {
            let records = winner
                .rows
                .iter()
                .map(OptionContract::to_record)
                .collect::<Vec<_>>();
            let warehouse = self.warehouse.clone();
            let symbol = symbol.to_string();
            let source = winner.provider.clone();
            let reports =
                run_blocking(move || warehouse.write_options(&symbol, &records, &source)).await?;
            result.partitions_written = partition_ids(&reports);
        }
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    /// Fill provider lists and the error message; hand back the winner.
    fn settle<T>(&self, result: &mut AcquisitionResult, routed: Routed<T>) -> Option<Winner<T>> {
        result.failed_providers = routed
            .failures
            .iter()
            .map(|failure| failure.provider.clone())
            .collect();

        match routed.winner {
            Some(winner) => {
                result.successful_providers = vec![winner.provider.clone()];
                result.failures = routed.failures;
                Some(winner)
            }
            None => {
                result.success = false;
                result.error_message = Some(failure_message(&routed));
                result.failures = routed.failures;
                None
            }
        }
    }

    async fn route<R: Fetch>(&self, deadline: Option<Instant>, request: &R) -> Routed<R::Row> {
        let mut routed = Routed {
            winner: None,
            failures: Vec::new(),
            skipped: Vec::new(),
            local_miss: false,
            deadline_hit: false,
        };

        for provider in &self.providers {
            let name = provider.name();
            if !provider.is_available() {
                tracing::debug!(provider = name, "provider not configured, skipping");
                routed.skipped.push(name.to_string());
                continue;
            }

            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => {
                        routed.deadline_hit = true;
                        break;
                    }
                },
                None => None,
            };

            let state = self.state.register(name, provider.requests_per_minute());
            if !state.budget.try_acquire() {
                state.health.record_failure(Duration::ZERO);
                tracing::warn!(provider = name, "rate budget exhausted");
                routed.failures.push(failure(
                    name,
                    ProviderError::rate_limited(format!(
                        "rate budget of {} requests per minute exhausted",
                        state.budget.requests_per_minute()
                    )),
                ));
                continue;
            }

            tracing::debug!(provider = name, "provider attempt");
            let attempt_started = Instant::now();
            let outcome = match remaining {
                Some(remaining) => {
                    match tokio::time::timeout(remaining, request.fetch(provider.as_ref())).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            routed.deadline_hit = true;
                            Err(ProviderError::timeout(format!(
                                "no response within {}ms",
                                remaining.as_millis()
                            )))
                        }
                    }
                }
                None => request.fetch(provider.as_ref()).await,
            };
            let outcome = outcome.and_then(|rows| {
                if rows.is_empty() {
                    Err(ProviderError::not_found("provider returned no rows"))
                } else {
                    request.prepare(rows)
                }
            });
            let elapsed = attempt_started.elapsed();

            match outcome {
                Ok(rows) => {
                    state.health.record_success(elapsed);
                    tracing::debug!(
                        provider = name,
                        rows = rows.len(),
                        latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "provider succeeded"
                    );
                    routed.winner = Some(Winner {
                        provider: name.to_string(),
                        local: provider.is_local(),
                        rows,
                    });
                    return routed;
                }
                // Stored rows not covering the request is a cache miss, not a
                // provider fault: health and failure lists stay untouched.
                Err(error) if provider.is_local() && error.kind() == ProviderErrorKind::NotFound => {
                    tracing::debug!(provider = name, reason = %error.message(), "local miss");
                    routed.local_miss = true;
                }
                Err(error) => {
                    state.health.record_failure(elapsed);
                    tracing::warn!(provider = name, kind = %error.kind(), error = %error.message(), "provider failed");
                    let kind = error.kind();
                    routed.failures.push(failure(name, error));
                    if !kind.allows_fallback() || routed.deadline_hit {
                        break;
                    }
                }
            }
        }
        routed
    }
}

/// A request the fallback loop can send to any provider.
trait Fetch: Sync {
    type Row: Send;

    fn fetch<'a>(&'a self, source: &'a dyn DataSource) -> SourceFuture<'a, Vec<Self::Row>>;

    /// Filter, deduplicate and validate a provider response.
    fn prepare(&self, rows: Vec<Self::Row>) -> Result<Vec<Self::Row>, ProviderError>;
}

impl Fetch for BarsRequest {
    type Row = Bar;

    fn fetch<'a>(&'a self, source: &'a dyn DataSource) -> SourceFuture<'a, Vec<Bar>> {
        source.fetch_bars(self.clone())
    }

    fn prepare(&self, rows: Vec<Bar>) -> Result<Vec<Bar>, ProviderError> {
        prepare_bars(self, rows)
    }
}

impl Fetch for OptionsRequest {
    type Row = OptionContract;

    fn fetch<'a>(&'a self, source: &'a dyn DataSource) -> SourceFuture<'a, Vec<OptionContract>> {
        source.fetch_options(self.clone())
    }

    fn prepare(&self, rows: Vec<OptionContract>) -> Result<Vec<OptionContract>, ProviderError> {
        prepare_chain(self, rows)
    }
}

fn prepare_bars(request: &BarsRequest, rows: Vec<Bar>) -> Result<Vec<Bar>, ProviderError> {
    let in_range = rows
        .into_iter()
        .filter(|bar| {
            let date = bar.ts.date();
            bar.symbol == request.symbol
                && bar.resolution == request.resolution
                && date >= request.from
                && date <= request.to
        })
        .collect::<Vec<_>>();
    if in_range.is_empty() {
        return Err(ProviderError::not_found(
            "provider returned no rows for the requested symbol and range",
        ));
    }
    let bars = dedup_bars(in_range);
    validate_bars(&bars).map_err(|violation| ProviderError::invalid_data(violation.to_string()))?;
    Ok(bars)
}

fn prepare_chain(
    request: &OptionsRequest,
    rows: Vec<OptionContract>,
) -> Result<Vec<OptionContract>, ProviderError> {
    let matching = rows
        .into_iter()
        .filter(|contract| contract.symbol == request.symbol && contract.expiry == request.expiry)
        .collect::<Vec<_>>();
    if matching.is_empty() {
        return Err(ProviderError::not_found(
            "provider returned no contracts for the requested expiry",
        ));
    }
    let chain = dedup_chain(matching);
    validate_chain(&chain).map_err(|violation| ProviderError::invalid_data(violation.to_string()))?;
    Ok(chain)
}

fn failure(provider: &str, error: ProviderError) -> ProviderFailure {
    ProviderFailure {
        provider: provider.to_string(),
        kind: error.kind(),
        message: error.message().to_string(),
    }
}

fn failure_message<T>(routed: &Routed<T>) -> String {
    let mut parts = routed
        .failures
        .iter()
        .map(|failure| format!("{}: {} ({})", failure.provider, failure.message, failure.kind))
        .collect::<Vec<_>>();
    if routed.local_miss {
        parts.push(String::from("stored rows do not cover the request"));
    }
    if routed.deadline_hit {
        parts.push(String::from("deadline exceeded"));
    }
    if !routed.skipped.is_empty() {
        parts.push(format!("not configured: {}", routed.skipped.join(", ")));
    }
    if parts.is_empty() {
        return String::from("no providers registered");
    }
    format!("all providers failed: {}", parts.join("; "))
}

fn partition_ids(reports: &[ImportReport]) -> Vec<String> {
    reports
        .iter()
        .map(|report| report.partition_id.clone())
        .collect()
}

/// Run blocking warehouse work on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, tickvault_warehouse::WarehouseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| CoreError::Internal(format!("blocking task failed: {error}")))?
        .map_err(CoreError::from)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
