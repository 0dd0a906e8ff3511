//! Yahoo Finance chart endpoint (`/v8/finance/chart/{symbol}`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::retry::{describe_http_error, is_retryable_http_status};
use super::{collect_snapshot, http_client, MarketSnapshotProvider, SeriesSource};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::model::{Instrument, MarketSnapshot, PriceSeries};

const SECS_PER_DAY: i64 = 86_400;

pub struct YahooProvider {
    client: Client,
    base: Url,
    range: String,
    interval: String,
}

impl YahooProvider {
    pub fn new(cfg: &Config) -> EngineResult<Self> {
        let base = Url::parse(&cfg.yahoo_base)
            .map_err(|e| EngineError::Config(format!("yahoo base {}: {}", cfg.yahoo_base, e)))?;
        Ok(Self {
            client: http_client(cfg)?,
            base,
            range: cfg.lookback_range.clone(),
            interval: cfg.bar_interval.clone(),
        })
    }

    fn chart_url(&self, symbol: &str) -> EngineResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Config(format!("yahoo base cannot hold a path: {}", self.base)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("range", &self.range)
            .append_pair("interval", &self.interval);
        Ok(url)
    }

    /// Daily and longer bars are keyed by epoch day so that venues in
    /// different time zones line up.
    fn daily_bars(&self) -> bool {
        !(self.interval.ends_with('m') || self.interval.ends_with('h'))
    }
}

#[async_trait]
impl SeriesSource for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_series(&self, instrument: &Instrument) -> EngineResult<PriceSeries> {
        let url = self.chart_url(&instrument.id)?;
        let resp = self.client.get(url).send().await.map_err(|e| describe_http_error(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| describe_http_error(&e))?;

        match parse_chart(&body, self.daily_bars()) {
            Ok(series) => Ok(series),
            Err(_) if !status.is_success() => Err(EngineError::DataUnavailable(format!(
                "HTTP {}{}",
                status.as_u16(),
                if is_retryable_http_status(status.as_u16()) { " (transient)" } else { "" }
            ))),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MarketSnapshotProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot> {
        collect_snapshot(self, instruments).await
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Parse a chart payload. Null closes (halted sessions) are dropped.
pub(crate) fn parse_chart(body: &str, daily: bool) -> EngineResult<PriceSeries> {
    let resp: ChartResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::DataUnavailable(format!("malformed chart payload: {}", e)))?;

    if let Some(err) = resp.chart.error {
        return Err(EngineError::DataUnavailable(format!("{}: {}", err.code, err.description)));
    }
    let result = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| EngineError::DataUnavailable("empty chart result".to_string()))?;

    let (closes, volumes) = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| (q.close, q.volume))
        .unwrap_or_default();
    let volume = volumes.into_iter().rev().flatten().next();

    let points = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let key = if daily { ts.div_euclid(SECS_PER_DAY) } else { *ts };
            close.map(|c| (key, c))
        });

    Ok(PriceSeries::new(points)
        .with_reported_price(result.meta.regular_market_price)
        .with_volume(volume))
}
