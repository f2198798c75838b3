//! Shared fixtures for the behavior suites: scripted providers and small
//! data builders.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::Date;
use tickvault_core::{
    AcquisitionPipeline, Bar, BarsRequest, DataSource, Greeks, OptionContract, OptionRight,
    OptionsRequest, ProviderError, ProviderErrorKind, ProviderStateRegistry, Resolution,
    SourceFuture, Symbol, UtcDateTime,
};
use tickvault_warehouse::{Warehouse, WarehouseConfig};

/// What a scripted provider does when called.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return the configured rows.
    Rows,
    /// Fail every call with this kind.
    Fail(ProviderErrorKind),
    /// Sleep, then return the configured rows.
    Slow(Duration),
}

/// In-memory provider with a fixed script and a call counter.
pub struct ScriptedSource {
    name: String,
    priority: u32,
    requests_per_minute: u32,
    available: bool,
    script: Script,
    bars: Vec<Bar>,
    chain: Vec<OptionContract>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: &str, priority: u32, script: Script) -> Self {
        Self {
            name: name.to_string(),
            priority,
            requests_per_minute: 1_000,
            available: true,
            script,
            bars: Vec::new(),
            chain: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars = bars;
        self
    }

    pub fn with_chain(mut self, chain: Vec<OptionContract>) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T: Clone>(&self, rows: &[T]) -> Result<Vec<T>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Rows => Ok(rows.to_vec()),
            Script::Fail(kind) => Err(ProviderError::new(
                *kind,
                format!("{} scripted failure", self.name),
            )),
            Script::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(rows.to_vec())
            }
        }
    }
}

impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    fn fetch_bars<'a>(&'a self, _request: BarsRequest) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move { self.respond(&self.bars).await })
    }

    fn fetch_options<'a>(&'a self, _request: OptionsRequest) -> SourceFuture<'a, Vec<OptionContract>> {
        Box::pin(async move { self.respond(&self.chain).await })
    }

    fn check_health<'a>(&'a self) -> SourceFuture<'a, ()> {
        Box::pin(async move { Ok(()) })
    }
}

pub fn symbol(raw: &str) -> Symbol {
    Symbol::parse(raw).expect("valid symbol")
}

pub fn day(raw: &str) -> Date {
    tickvault_core::parse_date(raw).expect("valid date")
}

/// One daily bar per calendar day starting at `from`, closes rising by 1.
pub fn daily_bars(ticker: &str, from: &str, days: usize, base_close: f64) -> Vec<Bar> {
    let start = day(from);
    (0..days)
        .map(|offset| {
            let date = start + time::Duration::days(offset as i64);
            let close = base_close + offset as f64;
            Bar::new(
                symbol(ticker),
                Resolution::OneDay,
                UtcDateTime::start_of(date),
                close - 0.5,
                close + 1.0,
                close - 1.0,
                close,
                1_000 + offset as u64,
            )
            .expect("valid bar")
        })
        .collect()
}

/// A call and a put at each strike.
pub fn chain(ticker: &str, expiry: &str, strikes: &[f64]) -> Vec<OptionContract> {
    strikes
        .iter()
        .flat_map(|strike| {
            [OptionRight::Call, OptionRight::Put].map(|right| {
                OptionContract::new(
                    symbol(ticker),
                    day(expiry),
                    right,
                    *strike,
                    1.0,
                    1.2,
                    Some(1.1),
                    Greeks {
                        delta: Some(if right == OptionRight::Call { 0.5 } else { -0.5 }),
                        ..Greeks::default()
                    },
                )
                .expect("valid contract")
            })
        })
        .collect()
}

pub fn open_warehouse(home: &Path) -> Warehouse {
    Warehouse::open(WarehouseConfig::at(home)).expect("open warehouse")
}

pub fn pipeline(warehouse: &Warehouse, sources: &[Arc<ScriptedSource>]) -> AcquisitionPipeline {
    let sources = sources
        .iter()
        .map(|source| Arc::clone(source) as Arc<dyn DataSource>)
        .collect();
    AcquisitionPipeline::new(
        warehouse.clone(),
        sources,
        Arc::new(ProviderStateRegistry::default()),
    )
}
