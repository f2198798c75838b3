use std::sync::Arc;

use serde::Deserialize;
use tickvault_warehouse::DateRange;

use crate::data_source::{BarsRequest, DataSource, ProviderError, SourceFuture};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Bar, Resolution, Symbol, UtcDateTime};

const BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart endpoint. Keyless; bars only.
#[derive(Clone)]
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    enabled: bool,
    base_url: String,
    priority: u32,
    requests_per_minute: u32,
}

impl YahooAdapter {
    pub fn new(enabled: bool) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()), enabled)
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, enabled: bool) -> Self {
        Self {
            http_client,
            enabled,
            base_url: String::from(BASE_URL),
            priority: 20,
            requests_per_minute: 60,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn chart(&self, url: &str) -> Result<ChartResult, ProviderError> {
        let request = HttpRequest::get(url).with_header("referer", "https://finance.yahoo.com/");
        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(ProviderError::from_status(response.status, &response.body));
        }
        let payload: ChartResponse = serde_json::from_str(&response.body)
            .map_err(|error| ProviderError::invalid_data(format!("yahoo chart payload: {error}")))?;
        if let Some(error) = payload.chart.error {
            return Err(if error.code.eq_ignore_ascii_case("Not Found") {
                ProviderError::not_found(error.description)
            } else {
                ProviderError::unavailable(format!("yahoo chart error {}: {}", error.code, error.description))
            });
        }
        payload
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| ProviderError::not_found("yahoo chart returned no result"))
    }

    async fn fetch_chart_bars(&self, request: &BarsRequest) -> Result<Vec<Bar>, ProviderError> {
        let range = DateRange::new(request.from, request.to)
            .ok_or_else(|| ProviderError::invalid_request("range end precedes start"))?;
        let (period1, period2) = range.unix_bounds();
        let url = format!(
            "{}/v8/finance/chart/{}?period1={period1}&period2={}&interval={}&includePrePost=false",
            self.base_url,
            urlencoding::encode(request.symbol.as_str()),
            period2 + 1,
            interval(request.resolution),
        );
        let result = self.chart(&url).await?;
        normalize_chart(&request.symbol, request.resolution, result)
    }
}

impl DataSource for YahooAdapter {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    fn fetch_bars<'a>(&'a self, request: BarsRequest) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move { self.fetch_chart_bars(&request).await })
    }

    fn check_health<'a>(&'a self) -> SourceFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/v8/finance/chart/SPY?range=1d&interval=1d", self.base_url);
            self.chart(&url).await.map(|_| ())
        })
    }
}

fn interval(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::OneMinute => "1m",
        Resolution::FiveMinutes => "5m",
        Resolution::OneHour => "60m",
        Resolution::OneDay => "1d",
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Slots with a missing price (halts, holidays) are skipped.
fn normalize_chart(
    symbol: &Symbol,
    resolution: Resolution,
    result: ChartResult,
) -> Result<Vec<Bar>, ProviderError> {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (index, ts) in result.timestamp.iter().copied().enumerate() {
        let field = |values: &[Option<f64>]| values.get(index).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };
        let volume = field(&quote.volume)
            .filter(|volume| volume.is_finite() && *volume > 0.0)
            .map_or(0, |volume| volume.round() as u64);
        let ts = UtcDateTime::from_unix(ts)
            .map_err(|error| ProviderError::invalid_data(error.to_string()))?;
        let bar = Bar::new(symbol.clone(), resolution, ts, open, high, low, close, volume)
            .map_err(|error| ProviderError::invalid_data(format!("yahoo bar {index}: {error}")))?;
        bars.push(bar);
    }
    Ok(bars)
}
