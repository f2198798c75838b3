//! Contract every `DataSource` implementation must honor, checked against
//! each shipped adapter with canned HTTP payloads.

#[path = "../support/mod.rs"]
mod support;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use support::{daily_bars, day, open_warehouse, symbol};
use tempfile::tempdir;
use tickvault_core::adapters::default_sources;
use tickvault_core::quality::validate_bars;
use tickvault_core::{
    BarsRequest, DataSource, HttpClient, HttpError, HttpRequest, HttpResponse,
    LocalPartitionProvider, OptionsRequest, PolygonAdapter, ProviderErrorKind, QueryEngine,
    Resolution, TickvaultConfig, YahooAdapter,
};
use tickvault_warehouse::Warehouse;

const POLYGON_AGGREGATES: &str = r#"{"status":"OK","results":[
    {"t":1704171600000,"o":472.16,"h":473.67,"l":470.49,"c":472.65,"v":123623734},
    {"t":1704258000000,"o":470.43,"h":471.19,"l":468.17,"c":468.79,"v":103585880},
    {"t":1704344400000,"o":468.30,"h":470.96,"l":467.05,"c":467.28,"v":84232171}
]}"#;

const YAHOO_CHART: &str = r#"{"chart":{"result":[{
    "timestamp":[1704205800,1704292200,1704378600],
    "indicators":{"quote":[{
        "open":[472.16,470.43,468.30],
        "high":[473.67,471.19,470.96],
        "low":[470.49,468.17,467.05],
        "close":[472.65,468.79,467.28],
        "volume":[123623700,103585900,84232200]
    }]}
}],"error":null}}"#;

/// Serves canned payloads keyed on the URL path.
struct CannedHttpClient;

impl HttpClient for CannedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = if request.url.contains("/v2/aggs/") {
            Ok(HttpResponse::ok_json(POLYGON_AGGREGATES))
        } else if request.url.contains("/v8/finance/chart/") {
            Ok(HttpResponse::ok_json(YAHOO_CHART))
        } else {
            Err(HttpError::new(format!("unexpected url {}", request.url)))
        };
        Box::pin(async move { response })
    }
}

struct ProviderCase {
    source: Arc<dyn DataSource>,
    serves_options: bool,
}

fn provider_cases(warehouse: &Warehouse) -> Vec<ProviderCase> {
    let http: Arc<dyn HttpClient> = Arc::new(CannedHttpClient);
    vec![
        ProviderCase {
            source: Arc::new(LocalPartitionProvider::new(QueryEngine::new(warehouse.clone()))),
            serves_options: true,
        },
        ProviderCase {
            source: Arc::new(PolygonAdapter::with_http_client(
                Arc::clone(&http),
                Some(String::from("test-key")),
            )),
            serves_options: true,
        },
        ProviderCase {
            source: Arc::new(YahooAdapter::with_http_client(http, true)),
            serves_options: false,
        },
    ]
}

fn seeded_warehouse(home: &std::path::Path) -> Warehouse {
    let warehouse = open_warehouse(home);
    let rows = daily_bars("SPY", "2024-01-02", 3, 470.0)
        .iter()
        .map(tickvault_core::Bar::to_record)
        .collect::<Vec<_>>();
    warehouse
        .write_bars("SPY", Resolution::OneDay.dataset(), &rows, "seed")
        .expect("seed");
    warehouse
}

fn request() -> BarsRequest {
    BarsRequest::new(symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-05"))
        .expect("valid request")
}

#[tokio::test]
async fn bars_are_valid_ascending_and_scoped_to_the_request() {
    let temp = tempdir().expect("tempdir");
    let warehouse = seeded_warehouse(temp.path());

    for case in provider_cases(&warehouse) {
        let name = case.source.name().to_string();
        let bars = case
            .source
            .fetch_bars(request())
            .await
            .unwrap_or_else(|error| panic!("provider '{name}' bars failed: {error}"));

        assert_eq!(bars.len(), 3, "provider '{name}': bar count");
        assert!(validate_bars(&bars).is_ok(), "provider '{name}': invalid bars");
        for bar in &bars {
            assert_eq!(bar.symbol.as_str(), "SPY", "provider '{name}': symbol");
            assert_eq!(bar.resolution, Resolution::OneDay, "provider '{name}': resolution");
            let date = bar.ts.date();
            assert!(
                date >= day("2024-01-01") && date <= day("2024-01-05"),
                "provider '{name}': bar outside range"
            );
        }
    }
}

#[test]
fn identity_and_budget_are_well_defined() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let cases = provider_cases(&warehouse);

    let names = cases.iter().map(|case| case.source.name()).collect::<Vec<_>>();
    assert_eq!(names, vec!["local", "polygon", "yahoo"]);
    assert!(cases
        .windows(2)
        .all(|pair| pair[0].source.priority() < pair[1].source.priority()));
    for case in &cases {
        assert!(case.source.requests_per_minute() > 0, "{}", case.source.name());
        assert!(case.source.is_available(), "{}", case.source.name());
    }
    assert!(cases[0].source.is_local());
    assert!(!cases[1].source.is_local());
}

#[tokio::test]
async fn option_chain_support_is_declared_honestly() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());

    for case in provider_cases(&warehouse) {
        let outcome = case
            .source
            .fetch_options(OptionsRequest {
                symbol: symbol("SPY"),
                expiry: day("2024-01-19"),
            })
            .await;
        if !case.serves_options {
            let error = outcome.expect_err("unsupported");
            assert_eq!(error.kind(), ProviderErrorKind::Unsupported, "{}", case.source.name());
        } else if let Err(error) = outcome {
            assert_ne!(error.kind(), ProviderErrorKind::Unsupported, "{}", case.source.name());
        }
    }
}

#[test]
fn credentials_decide_availability() {
    let http: Arc<dyn HttpClient> = Arc::new(CannedHttpClient);
    assert!(!PolygonAdapter::with_http_client(Arc::clone(&http), None).is_available());
    assert!(!YahooAdapter::with_http_client(http, false).is_available());
}

#[test]
fn default_sources_put_local_data_first() {
    let temp = tempdir().expect("tempdir");
    let engine = QueryEngine::new(open_warehouse(temp.path()));
    let sources = default_sources(&TickvaultConfig::default(), engine);

    let names = sources.iter().map(|source| source.name()).collect::<Vec<_>>();
    assert_eq!(names, vec!["local", "polygon", "yahoo"]);
    assert!(!sources[1].is_available(), "polygon needs an API key");
}
