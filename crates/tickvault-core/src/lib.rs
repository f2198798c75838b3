//! # Tickvault Core
//!
//! Domain model, query engine and acquisition pipeline for tickvault.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`acquisition`] | Provider fallback, rate budgets, health and import |
//! | [`adapters`] | Local, Polygon and Yahoo providers |
//! | [`config`] | Environment configuration |
//! | [`data_source`] | Provider trait, requests and typed provider errors |
//! | [`domain`] | Bar, OptionContract, Symbol, Resolution, UtcDateTime |
//! | [`envelope`] | Versioned response envelope and stable error codes |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider_state`] | Per-provider rate budget and health counters |
//! | [`quality`] | Row and batch invariant checks, partition audit |
//! | [`query`] | Partition router and query engine |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ CLI / IPC frontend   │
//! └───────┬───────┬──────┘
//!         │       │
//!         ▼       ▼
//! ┌────────────┐ ┌─────────────────────┐     ┌──────────────────┐
//! │ QueryEngine│ │ AcquisitionPipeline │────▶│ DataSource (Vec) │
//! └─────┬──────┘ └──────────┬──────────┘     └──────────────────┘
//!       │                   │ validate, dedup
//!       ▼                   ▼
//! ┌──────────────────────────────────┐
//! │ tickvault-warehouse (partitions) │
//! └──────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tickvault_core::adapters::default_sources;
//! use tickvault_core::{
//!     parse_date, AcquisitionPipeline, ProviderStateRegistry, QueryEngine, Resolution, Symbol,
//!     TickvaultConfig,
//! };
//! use tickvault_warehouse::Warehouse;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TickvaultConfig::from_env()?;
//!     let warehouse = Warehouse::open(config.warehouse_config())?;
//!     let engine = QueryEngine::new(warehouse.clone());
//!     let pipeline = AcquisitionPipeline::new(
//!         warehouse,
//!         default_sources(&config, engine.clone()),
//!         Arc::new(ProviderStateRegistry::new(config.unhealthy_after)),
//!     );
//!
//!     let spy = Symbol::parse("SPY")?;
//!     let (from, to) = (parse_date("2024-01-01")?, parse_date("2024-01-31")?);
//!     pipeline.acquire_bars(&spy, Resolution::OneDay, from, to, None).await?;
//!     let bars = engine
//!         .query_bars(&spy, Resolution::OneDay, from, to, Duration::from_secs(5))
//!         .await?;
//!     println!("{} bars", bars.len());
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod provider_state;
pub mod quality;
pub mod query;

pub use acquisition::{AcquisitionPipeline, AcquisitionResult, ProviderFailure};
pub use adapters::{LocalPartitionProvider, PolygonAdapter, YahooAdapter};
pub use config::{EmptyResultPolicy, TickvaultConfig};
pub use data_source::{
    BarsRequest, DataSource, OptionsRequest, ProviderError, ProviderErrorKind, SourceFuture,
};
pub use domain::{
    format_date, parse_date, Bar, Greeks, OptionContract, OptionRight, Resolution, Symbol,
    UtcDateTime,
};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta, ErrorCode, SCHEMA_VERSION};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use provider_state::{
    ProviderHealth, ProviderStateRegistry, ProviderStatus, RateBudget, RateLimitStatus,
};
pub use quality::{AuditReport, QualityViolation};
pub use query::QueryEngine;
