//! Indian mutual fund NAV history from mfapi.in (`/mf/{scheme_code}`).

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::retry::{describe_http_error, is_retryable_http_status};
use super::{collect_snapshot, http_client, MarketSnapshotProvider, SeriesSource};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::model::{Instrument, MarketSnapshot, PriceSeries};

pub struct MfApiProvider {
    client: Client,
    base: Url,
    history: usize,
}

impl MfApiProvider {
    pub fn new(cfg: &Config) -> EngineResult<Self> {
        let base = Url::parse(&cfg.mfapi_base)
            .map_err(|e| EngineError::Config(format!("mfapi base {}: {}", cfg.mfapi_base, e)))?;
        Ok(Self { client: http_client(cfg)?, base, history: cfg.mfapi_history.max(2) })
    }

    fn scheme_url(&self, code: &str) -> EngineResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Config(format!("mfapi base cannot hold a path: {}", self.base)))?
            .pop_if_empty()
            .extend(["mf", code]);
        Ok(url)
    }
}

#[async_trait]
impl SeriesSource for MfApiProvider {
    fn name(&self) -> &'static str {
        "mfapi"
    }

    async fn fetch_series(&self, instrument: &Instrument) -> EngineResult<PriceSeries> {
        let url = self.scheme_url(&instrument.id)?;
        let resp = self.client.get(url).send().await.map_err(|e| describe_http_error(&e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::DataUnavailable(format!(
                "HTTP {}{}",
                status.as_u16(),
                if is_retryable_http_status(status.as_u16()) { " (transient)" } else { "" }
            )));
        }
        let body = resp.text().await.map_err(|e| describe_http_error(&e))?;
        parse_nav_history(&body, self.history)
    }
}

#[async_trait]
impl MarketSnapshotProvider for MfApiProvider {
    fn name(&self) -> &'static str {
        "mfapi"
    }

    async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot> {
        collect_snapshot(self, instruments).await
    }
}

#[derive(Debug, Deserialize)]
struct SchemeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Vec<NavPoint>,
}

#[derive(Debug, Deserialize)]
struct NavPoint {
    date: String,
    nav: String,
}

/// Parse the newest `history` NAV points. Unparseable rows are skipped.
pub(crate) fn parse_nav_history(body: &str, history: usize) -> EngineResult<PriceSeries> {
    let resp: SchemeResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::DataUnavailable(format!("malformed NAV payload: {}", e)))?;

    if let Some(status) = resp.status.as_deref() {
        if !status.eq_ignore_ascii_case("success") {
            return Err(EngineError::DataUnavailable(format!("scheme status {}", status)));
        }
    }

    // newest first on the wire
    let points = resp.data.iter().take(history).filter_map(|p| {
        let date = NaiveDate::parse_from_str(p.date.trim(), "%d-%m-%Y").ok()?;
        let nav: f64 = p.nav.trim().parse().ok()?;
        Some((date.num_days_from_ce() as i64, nav))
    });
    let series = PriceSeries::new(points);
    if series.is_empty() {
        return Err(EngineError::DataUnavailable("no NAV history".to_string()));
    }
    Ok(series)
}
