use std::sync::Arc;

use serde::Deserialize;
use time::Date;

use crate::data_source::{BarsRequest, DataSource, OptionsRequest, ProviderError, SourceFuture};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{
    format_date, parse_date, Bar, Greeks, OptionContract, OptionRight, Resolution, Symbol,
    UtcDateTime,
};

const BASE_URL: &str = "https://api.polygon.io";
const MAX_CHAIN_PAGES: usize = 20;

/// Polygon.io aggregates and option chain snapshots.
#[derive(Clone)]
pub struct PolygonAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: Option<HttpAuth>,
    base_url: String,
    priority: u32,
    requests_per_minute: u32,
}

impl PolygonAdapter {
    /// Adapter backed by reqwest. `None` leaves the provider unavailable.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()), api_key)
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, api_key: Option<String>) -> Self {
        Self {
            http_client,
            auth: api_key
                .filter(|key| !key.trim().is_empty())
                .map(HttpAuth::Bearer),
            base_url: String::from(BASE_URL),
            priority: 10,
            requests_per_minute: 5,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    async fn get_json<T>(&self, url: &str) -> Result<T, ProviderError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| ProviderError::auth("polygon API key not configured"))?;
        let response = self
            .http_client
            .execute(HttpRequest::get(url).with_auth(auth))
            .await?;
        if !response.is_success() {
            return Err(ProviderError::from_status(response.status, &response.body));
        }
        serde_json::from_str(&response.body)
            .map_err(|error| ProviderError::invalid_data(format!("polygon payload: {error}")))
    }

    async fn fetch_aggregates(&self, request: &BarsRequest) -> Result<Vec<Bar>, ProviderError> {
        let (multiplier, timespan) = timespan(request.resolution);
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{multiplier}/{timespan}/{}/{}?adjusted=true&sort=asc&limit=50000",
            self.base_url,
            urlencoding::encode(request.symbol.as_str()),
            format_date(request.from),
            format_date(request.to),
        );
        let payload: AggregatesPayload = self.get_json(&url).await?;
        if payload.status.as_deref() == Some("ERROR") {
            return Err(ProviderError::unavailable(
                payload
                    .error
                    .unwrap_or_else(|| String::from("polygon reported an error")),
            ));
        }
        payload
            .results
            .into_iter()
            .map(|row| normalize_bar(&request.symbol, request.resolution, row))
            .collect()
    }

    async fn fetch_chain(&self, request: &OptionsRequest) -> Result<Vec<OptionContract>, ProviderError> {
        let mut url = format!(
            "{}/v3/snapshot/options/{}?expiration_date={}&limit=250",
            self.base_url,
            urlencoding::encode(request.symbol.as_str()),
            format_date(request.expiry),
        );
        let mut chain = Vec::new();
        for _ in 0..MAX_CHAIN_PAGES {
            let page: SnapshotPayload = self.get_json(&url).await?;
            for row in page.results {
                if let Some(contract) = normalize_contract(&request.symbol, row)? {
                    chain.push(contract);
                }
            }
            match page.next_url {
                Some(next) if !next.is_empty() => url = next,
                _ => return Ok(chain),
            }
        }
        tracing::warn!(symbol = %request.symbol, "polygon chain truncated after {MAX_CHAIN_PAGES} pages");
        Ok(chain)
    }
}

impl DataSource for PolygonAdapter {
    fn name(&self) -> &str {
        "polygon"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        self.auth.is_some()
    }

    fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    fn fetch_bars<'a>(&'a self, request: BarsRequest) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move { self.fetch_aggregates(&request).await })
    }

    fn fetch_options<'a>(&'a self, request: OptionsRequest) -> SourceFuture<'a, Vec<OptionContract>> {
        Box::pin(async move { self.fetch_chain(&request).await })
    }

    fn check_health<'a>(&'a self) -> SourceFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/v1/marketstatus/now", self.base_url);
            let _: serde_json::Value = self.get_json(&url).await?;
            Ok(())
        })
    }
}

fn timespan(resolution: Resolution) -> (u32, &'static str) {
    match resolution {
        Resolution::OneMinute => (1, "minute"),
        Resolution::FiveMinutes => (5, "minute"),
        Resolution::OneHour => (1, "hour"),
        Resolution::OneDay => (1, "day"),
    }
}

#[derive(Debug, Deserialize)]
struct AggregatesPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<AggregateRow>,
}

#[derive(Debug, Deserialize)]
struct AggregateRow {
    /// Window start, unix milliseconds.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    #[serde(default)]
    results: Vec<SnapshotRow>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotRow {
    details: ContractDetails,
    #[serde(default)]
    last_quote: Option<LastQuote>,
    #[serde(default)]
    greeks: Option<SnapshotGreeks>,
    #[serde(default)]
    implied_volatility: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ContractDetails {
    contract_type: String,
    expiration_date: String,
    strike_price: f64,
}

#[derive(Debug, Default, Deserialize)]
struct LastQuote {
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    midpoint: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotGreeks {
    delta: Option<f64>,
    gamma: Option<f64>,
    theta: Option<f64>,
    vega: Option<f64>,
}

fn normalize_bar(symbol: &Symbol, resolution: Resolution, row: AggregateRow) -> Result<Bar, ProviderError> {
    let ts = UtcDateTime::from_unix(row.t.div_euclid(1_000))
        .map_err(|error| ProviderError::invalid_data(error.to_string()))?;
    let volume = if row.v.is_finite() && row.v > 0.0 {
        row.v.round() as u64
    } else {
        0
    };
    Bar::new(symbol.clone(), resolution, ts, row.o, row.h, row.l, row.c, volume)
        .map_err(|error| ProviderError::invalid_data(format!("polygon bar at {}: {error}", row.t)))
}

/// Contracts with an unknown type are skipped; malformed numbers reject the page.
fn normalize_contract(
    symbol: &Symbol,
    row: SnapshotRow,
) -> Result<Option<OptionContract>, ProviderError> {
    let right = match row.details.contract_type.to_ascii_lowercase().as_str() {
        "call" => OptionRight::Call,
        "put" => OptionRight::Put,
        _ => return Ok(None),
    };
    let expiry: Date = parse_date(&row.details.expiration_date)
        .map_err(|error| ProviderError::invalid_data(error.to_string()))?;
    let quote = row.last_quote.unwrap_or_default();
    let greeks = row.greeks.unwrap_or_default();
    OptionContract::new(
        symbol.clone(),
        expiry,
        right,
        row.details.strike_price,
        quote.bid.unwrap_or(0.0),
        quote.ask.unwrap_or(0.0),
        quote.midpoint,
        Greeks {
            delta: greeks.delta,
            gamma: greeks.gamma,
            theta: greeks.theta,
            vega: greeks.vega,
            iv: row.implied_volatility,
        },
    )
    .map(Some)
    .map_err(|error| ProviderError::invalid_data(format!("polygon contract: {error}")))
}
