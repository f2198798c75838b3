//! Request handling shared by the one-shot CLI and the IPC server.
//!
//! Every request runs `Received → Validated → Resolved → Enveloped`; any
//! failure along the way short-circuits to an error envelope, so callers
//! always get exactly one well-formed envelope back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tickvault_core::adapters::default_sources;
use tickvault_core::{
    AcquisitionPipeline, CoreError, DataSource, Envelope, EnvelopeError, ErrorCode,
    ProviderStateRegistry, QueryEngine, TickvaultConfig,
};
use tickvault_warehouse::Warehouse;

use crate::commands::{self, CommandResult, Parameters};
use crate::metadata::Metadata;

/// `{command, parameters}` as accepted on every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            parameters,
        }
    }
}

/// One query engine and one acquisition pipeline, shared by every request.
pub struct Service {
    config: TickvaultConfig,
    engine: QueryEngine,
    pipeline: AcquisitionPipeline,
}

impl Service {
    /// Open the configured warehouse and wire the default provider list.
    pub fn open(config: TickvaultConfig) -> Result<Self, CoreError> {
        let warehouse = Warehouse::open(config.warehouse_config())?;
        let engine = QueryEngine::new(warehouse.clone());
        let sources = default_sources(&config, engine.clone());
        Ok(Self::with_sources(config, warehouse, sources))
    }

    pub fn with_sources(
        config: TickvaultConfig,
        warehouse: Warehouse,
        sources: Vec<Arc<dyn DataSource>>,
    ) -> Self {
        let state = Arc::new(ProviderStateRegistry::new(config.unhealthy_after));
        let engine = QueryEngine::new(warehouse.clone());
        let pipeline = AcquisitionPipeline::new(warehouse, sources, state);
        Self {
            config,
            engine,
            pipeline,
        }
    }

    pub fn config(&self) -> &TickvaultConfig {
        &self.config
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn pipeline(&self) -> &AcquisitionPipeline {
        &self.pipeline
    }

    pub async fn handle(&self, request: &Request) -> Envelope<Value> {
        let metadata = Metadata::start();
        tracing::debug!(
            command = %request.command,
            request_id = %metadata.request_id(),
            "request received"
        );

        let outcome =
            commands::dispatch(self, &request.command, Parameters::new(&request.parameters)).await;
        enveloped(&request.command, metadata, outcome)
    }

    /// Answer `discover` and `version` before any service exists.
    pub fn answer_without_storage(request: &Request) -> Option<Envelope<Value>> {
        let metadata = Metadata::start();
        commands::without_storage(&request.command)
            .map(|outcome| enveloped(&request.command, metadata, outcome))
    }

    /// Handle `request` on its own task so a panic inside a command still
    /// yields an `INTERNAL_ERROR` envelope.
    pub async fn handle_isolated(self: &Arc<Self>, request: Request) -> Envelope<Value> {
        let service = Arc::clone(self);
        let command = request.command.clone();
        match tokio::spawn(async move { service.handle(&request).await }).await {
            Ok(envelope) => envelope,
            Err(join) => {
                tracing::error!(%command, error = %join, "request task aborted");
                rejection(commands::failure(
                    ErrorCode::InternalError,
                    format!("command '{command}' failed unexpectedly"),
                ))
            }
        }
    }
}

fn enveloped(
    command: &str,
    mut metadata: Metadata,
    outcome: Result<CommandResult, EnvelopeError>,
) -> Envelope<Value> {
    match outcome {
        Ok(result) => {
            for warning in result.warnings {
                metadata.push_warning(warning);
            }
            Envelope::success(metadata.into_envelope_meta(result.count), result.data)
        }
        Err(error) => {
            tracing::debug!(%command, code = %error.code, "request failed");
            Envelope::failure(metadata.into_envelope_meta(0), error)
        }
    }
}

/// Error envelope for a request that never reached a command, such as an
/// unparseable frame or command line.
pub fn rejection(error: EnvelopeError) -> Envelope<Value> {
    Envelope::failure(Metadata::start().into_envelope_meta(0), error)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use tickvault_core::{parse_date, Bar, EmptyResultPolicy, Resolution, Symbol, UtcDateTime};
    use tickvault_warehouse::WarehouseConfig;

    use super::*;
    use crate::error::CliError;

    fn service(home: &TempDir, empty_result: EmptyResultPolicy) -> Service {
        let config = TickvaultConfig {
            home: Some(home.path().to_path_buf()),
            empty_result,
            ..TickvaultConfig::default()
        };
        let warehouse = Warehouse::open(WarehouseConfig::at(home.path())).expect("warehouse");
        Service::with_sources(config, warehouse, Vec::new())
    }

    fn request(command: &str, parameters: Value) -> Request {
        let Value::Object(parameters) = parameters else {
            panic!("parameters must be an object");
        };
        Request::new(command, parameters)
    }

    fn seed_day(service: &Service, day: &str) {
        let symbol = Symbol::parse("SPY").expect("symbol");
        let ts = UtcDateTime::start_of(parse_date(day).expect("date"));
        let bar = Bar::new(symbol, Resolution::OneDay, ts, 470.0, 475.0, 468.0, 472.5, 1_000)
            .expect("bar");
        service
            .engine()
            .warehouse()
            .write_bars("SPY", Resolution::OneDay.dataset(), &[bar.to_record()], "test")
            .expect("write");
    }

    #[tokio::test]
    async fn single_day_query_returns_one_bar() {
        let home = TempDir::new().expect("tempdir");
        let service = service(&home, EmptyResultPolicy::Empty);
        seed_day(&service, "2024-01-15");

        let envelope = service
            .handle(&request(
                "get-bars",
                json!({"symbol": "SPY", "from": "2024-01-15", "to": "2024-01-15", "granularity": "1d"}),
            ))
            .await;

        assert!(envelope.ok, "{envelope:?}");
        assert!(envelope.is_well_formed());
        assert_eq!(envelope.meta.count, 1);
        let data = envelope.data.expect("data");
        assert_eq!(data["granularity"], "1d");
        assert_eq!(data["bars"][0]["c"], 472.5);
        assert_eq!(data["bars"][0]["symbol"], "SPY");
    }

    #[tokio::test]
    async fn invalid_symbol_short_circuits() {
        let home = TempDir::new().expect("tempdir");
        let service = service(&home, EmptyResultPolicy::Empty);

        let envelope = service
            .handle(&request(
                "get-bars",
                json!({"symbol": "", "from": "2024-01-15", "to": "2024-01-15"}),
            ))
            .await;

        assert!(!envelope.ok);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.expect("error").code, ErrorCode::InvalidSymbol);
    }

    #[tokio::test]
    async fn reversed_range_is_invalid_date_range() {
        let home = TempDir::new().expect("tempdir");
        let service = service(&home, EmptyResultPolicy::Empty);

        let envelope = service
            .handle(&request(
                "get-bars",
                json!({"symbol": "SPY", "from": "2024-02-01", "to": "2024-01-01"}),
            ))
            .await;

        assert_eq!(envelope.error.expect("error").code, ErrorCode::InvalidDateRange);
    }

    #[tokio::test]
    async fn empty_result_follows_policy() {
        let parameters = json!({"symbol": "QQQ", "from": "2024-01-02", "to": "2024-01-05"});

        let home = TempDir::new().expect("tempdir");
        let lenient = service(&home, EmptyResultPolicy::Empty)
            .handle(&request("get-bars", parameters.clone()))
            .await;
        assert!(lenient.ok);
        assert_eq!(lenient.meta.count, 0);

        let home = TempDir::new().expect("tempdir");
        let strict = service(&home, EmptyResultPolicy::NotFound)
            .handle(&request("get-bars", parameters))
            .await;
        let error = strict.error.expect("error");
        assert_eq!(error.code, ErrorCode::DataNotFound);
        assert_eq!(error.code.exit_code(), 3);
    }

    #[tokio::test]
    async fn unknown_command_is_invalid_arguments() {
        let home = TempDir::new().expect("tempdir");
        let envelope = service(&home, EmptyResultPolicy::Empty)
            .handle(&request("get-quotes", json!({})))
            .await;
        let error = envelope.error.expect("error");
        assert_eq!(error.code, ErrorCode::InvalidArguments);
        assert!(error.hint.is_some());
    }

    #[test]
    fn discover_and_version_need_no_storage() {
        let discover = Service::answer_without_storage(&request("discover", json!({})))
            .expect("answered");
        assert!(discover.ok);
        assert_eq!(discover.data.expect("data")["service"], "tickvault");

        let version = Service::answer_without_storage(&request("version", json!({})))
            .expect("answered");
        assert_eq!(version.meta.count, 1);

        assert!(Service::answer_without_storage(&request("get-bars", json!({}))).is_none());
    }

    #[test]
    fn unopenable_home_becomes_an_internal_error_envelope() {
        let home = TempDir::new().expect("tempdir");
        let not_a_dir = home.path().join("occupied");
        std::fs::write(&not_a_dir, b"file").expect("write");
        let config = TickvaultConfig {
            home: Some(not_a_dir),
            ..TickvaultConfig::default()
        };

        let Err(error) = Service::open(config) else {
            panic!("a file cannot be a warehouse home");
        };
        let envelope = rejection(CliError::Startup(error).envelope_error());
        assert!(envelope.is_well_formed());
        let error = envelope.error.expect("error");
        assert_eq!(error.code, ErrorCode::InternalError);
        assert_eq!(error.code.exit_code(), 10);
        assert!(error.hint.is_some());
    }

    #[tokio::test]
    async fn provider_status_with_no_sources_is_empty() {
        let home = TempDir::new().expect("tempdir");
        let envelope = service(&home, EmptyResultPolicy::Empty)
            .handle(&request("provider-status", json!({})))
            .await;
        assert!(envelope.ok);
        assert_eq!(envelope.data.expect("data")["providers"], json!([]));
    }
}
