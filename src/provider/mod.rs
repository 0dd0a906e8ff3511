use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::logging::log_omitted;
use crate::model::{Instrument, MarketSnapshot, PriceSeries};

mod mfapi;
pub mod retry;
mod synthetic;
mod yahoo;

pub use mfapi::MfApiProvider;
pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;

/// Source of per-cycle market snapshots.
///
/// Fails with `DataUnavailable` only when no instrument has data; instruments
/// with missing data are left out of the snapshot.
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot>;
}

/// Per-instrument history endpoint, fanned out by [`collect_snapshot`].
#[async_trait]
pub trait SeriesSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_series(&self, instrument: &Instrument) -> EngineResult<PriceSeries>;
}

/// Fetch every instrument concurrently and assemble a snapshot from whatever
/// came back.
pub async fn collect_snapshot<S: SeriesSource + ?Sized>(
    source: &S,
    instruments: &[Instrument],
) -> EngineResult<MarketSnapshot> {
    if instruments.is_empty() {
        return Err(EngineError::DataUnavailable("empty instrument list".to_string()));
    }
    let results = join_all(instruments.iter().map(|i| source.fetch_series(i))).await;

    let mut series = Vec::with_capacity(instruments.len());
    for (inst, res) in instruments.iter().zip(results) {
        match res {
            Ok(s) if s.len() >= 2 => series.push((inst.clone(), s)),
            Ok(s) => log_omitted(source.name(), &inst.id, &format!("only {} closes", s.len())),
            Err(err) => log_omitted(source.name(), &inst.id, &err.to_string()),
        }
    }
    if series.is_empty() {
        return Err(EngineError::DataUnavailable(format!(
            "{}: no data for any of {} instruments",
            source.name(),
            instruments.len()
        )));
    }
    MarketSnapshot::from_series(instruments, series)
}

pub(crate) fn http_client(cfg: &Config) -> EngineResult<Client> {
    Client::builder()
        .timeout(cfg.http_timeout())
        .user_agent(concat!("Mozilla/5.0 (compatible; quantpulse/", env!("CARGO_PKG_VERSION"), ")"))
        .build()
        .map_err(|e| EngineError::Config(format!("http client: {}", e)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Yahoo,
    MfApi,
    Synthetic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Yahoo => "yahoo",
            ProviderKind::MfApi => "mfapi",
            ProviderKind::Synthetic => "synthetic",
        }
    }

    pub fn build(self, cfg: &Config) -> EngineResult<Arc<dyn MarketSnapshotProvider>> {
        match self {
            ProviderKind::Yahoo => Ok(Arc::new(YahooProvider::new(cfg)?)),
            ProviderKind::MfApi => Ok(Arc::new(MfApiProvider::new(cfg)?)),
            ProviderKind::Synthetic => Ok(Arc::new(SyntheticProvider::new(cfg.seed, 30))),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yahoo" => Ok(ProviderKind::Yahoo),
            "mfapi" => Ok(ProviderKind::MfApi),
            "synthetic" => Ok(ProviderKind::Synthetic),
            other => Err(EngineError::Config(format!("unknown provider {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Canned(HashMap<&'static str, EngineResult<PriceSeries>>);

    #[async_trait]
    impl SeriesSource for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn fetch_series(&self, instrument: &Instrument) -> EngineResult<PriceSeries> {
            self.0
                .get(instrument.id.as_str())
                .cloned()
                .unwrap_or_else(|| Err(EngineError::DataUnavailable("unknown".into())))
        }
    }

    fn series(closes: &[f64]) -> PriceSeries {
        PriceSeries::new(closes.iter().enumerate().map(|(i, c)| (i as i64, *c)))
    }

    fn universe(ids: &[&str]) -> Vec<Instrument> {
        ids.iter().map(|id| Instrument::new(*id, *id)).collect()
    }

    #[tokio::test]
    async fn test_bad_ticker_does_not_abort_fetch() {
        let mut data = HashMap::new();
        data.insert("A", Ok(series(&[10.0, 11.0, 12.0])));
        data.insert("B", Err(EngineError::DataUnavailable("delisted".into())));
        data.insert("C", Ok(series(&[5.0])));
        data.insert("D", Ok(series(&[20.0, 19.0, 21.0])));
        let source = Canned(data);

        let snap = collect_snapshot(&source, &universe(&["A", "B", "C", "D"])).await.unwrap();
        let ids: Vec<String> = snap.instruments().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["A", "D"]);
    }

    #[tokio::test]
    async fn test_all_missing_is_data_unavailable() {
        let mut data = HashMap::new();
        data.insert("A", Err(EngineError::DataUnavailable("timeout".into())));
        let source = Canned(data);
        let err = collect_snapshot(&source, &universe(&["A", "B"])).await.unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Yahoo".parse::<ProviderKind>().unwrap(), ProviderKind::Yahoo);
        assert_eq!("mfapi".parse::<ProviderKind>().unwrap(), ProviderKind::MfApi);
        assert!("bloomberg".parse::<ProviderKind>().is_err());
    }
}
