//! Instruments, market snapshots, selections and signal packets.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::stats::{mean, round2, sample_covariance, sample_variance, simple_returns};

/// Fewer common dates than this and series are aligned by tail instead.
pub const MIN_ALIGNED_POINTS: usize = 3;

// =============================================================================
// Instrument
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub name: String,
}

impl Instrument {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    /// Parse `ID` or `ID:Display Name`. Blank ids yield `None`.
    pub fn parse(spec: &str) -> Option<Self> {
        let (id, name) = match spec.split_once(':') {
            Some((id, name)) => (id.trim(), name.trim()),
            None => (spec.trim(), ""),
        };
        if id.is_empty() {
            return None;
        }
        let name = if name.is_empty() { id } else { name };
        Some(Self::new(id, name))
    }

    /// Short ticker for display: `RELIANCE.NS` -> `RELIANCE`, `GC=F` unchanged.
    pub fn ticker(&self) -> &str {
        if let Some((base, suffix)) = self.id.rsplit_once('.') {
            let is_exchange = (1..=3).contains(&suffix.len())
                && suffix.chars().all(|c| c.is_ascii_uppercase());
            if !base.is_empty() && is_exchange {
                return base;
            }
        }
        &self.id
    }
}

// =============================================================================
// Price history
// =============================================================================

/// Closing prices keyed by period (epoch day for daily bars), ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<(i64, f64)>,
    reported_price: Option<f64>,
    volume: Option<f64>,
}

impl PriceSeries {
    /// Drops non-finite / non-positive closes, sorts by key, keeps the last
    /// close for duplicated keys.
    pub fn new(points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        let mut points: Vec<(i64, f64)> = points
            .into_iter()
            .filter(|(_, c)| c.is_finite() && *c > 0.0)
            .collect();
        points.sort_by_key(|(k, _)| *k);
        let mut deduped: Vec<(i64, f64)> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.0 == p.0 => *last = p,
                _ => deduped.push(p),
            }
        }
        Self { points: deduped, reported_price: None, volume: None }
    }

    /// Venue-reported live price, preferred over the last close when valid.
    pub fn with_reported_price(mut self, price: Option<f64>) -> Self {
        self.reported_price = price.filter(|p| p.is_finite() && *p > 0.0);
        self
    }

    /// Traded volume of the latest session, where the venue reports one.
    pub fn with_volume(mut self, volume: Option<f64>) -> Self {
        self.volume = volume.filter(|v| v.is_finite() && *v >= 0.0);
        self
    }

    pub fn volume(&self) -> Option<f64> {
        self.volume
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.points.iter().map(|(k, _)| *k)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|(_, c)| *c).collect()
    }

    pub fn close_at(&self, key: i64) -> Option<f64> {
        self.points
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .map(|i| self.points[i].1)
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.reported_price.or_else(|| self.points.last().map(|(_, c)| *c))
    }

    pub fn prev_close(&self) -> Option<f64> {
        let n = self.points.len();
        (n >= 2).then(|| self.points[n - 2].1)
    }
}

// =============================================================================
// Market snapshot
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub instrument: Instrument,
    pub price: f64,
    pub prev_close: Option<f64>,
    pub volume: Option<f64>,
    /// Trailing returns, aligned with every other entry in the snapshot.
    pub returns: Vec<f64>,
}

impl SnapshotEntry {
    pub fn expected_return(&self) -> f64 {
        mean(&self.returns)
    }

    pub fn last_return(&self) -> Option<f64> {
        self.returns.last().copied()
    }

    pub fn volatility(&self) -> f64 {
        sample_variance(&self.returns).sqrt()
    }

    pub fn day_change_pct(&self) -> Option<f64> {
        self.prev_close
            .filter(|p| *p > 0.0)
            .map(|p| (self.price - p) / p * 100.0)
    }
}

/// Immutable per-cycle view of the market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    fetched_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
    covariance: Vec<Vec<f64>>,
}

impl MarketSnapshot {
    pub fn new(entries: Vec<SnapshotEntry>, covariance: Vec<Vec<f64>>) -> EngineResult<Self> {
        if entries.is_empty() {
            return Err(EngineError::DataUnavailable(
                "no instrument returned data".to_string(),
            ));
        }
        let n = entries.len();
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(EngineError::DataUnavailable(format!(
                "covariance shape does not match {} instruments",
                n
            )));
        }
        Ok(Self { fetched_at: Utc::now(), entries, covariance })
    }

    /// Build a snapshot from raw price histories.
    ///
    /// Entries follow `universe` ordering. Series with fewer than two closes
    /// or whose instrument is not in the universe are left out.
    pub fn from_series(
        universe: &[Instrument],
        series: Vec<(Instrument, PriceSeries)>,
    ) -> EngineResult<Self> {
        let mut usable: Vec<(usize, Instrument, PriceSeries)> = series
            .into_iter()
            .filter(|(_, s)| s.len() >= 2)
            .filter_map(|(inst, s)| {
                universe
                    .iter()
                    .position(|u| u.id == inst.id)
                    .map(|pos| (pos, inst, s))
            })
            .collect();
        usable.sort_by_key(|(pos, _, _)| *pos);
        usable.dedup_by_key(|(pos, _, _)| *pos);

        if usable.is_empty() {
            return Err(EngineError::DataUnavailable(
                "no instrument returned enough history".to_string(),
            ));
        }

        let aligned = align_closes(usable.iter().map(|(_, _, s)| s));
        let returns: Vec<Vec<f64>> = aligned.iter().map(|c| simple_returns(c)).collect();
        let covariance = sample_covariance(&returns);

        // every usable series has at least two closes, so a latest price exists
        let entries = usable
            .into_iter()
            .zip(returns)
            .map(|((_, instrument, s), rets)| SnapshotEntry {
                instrument,
                price: s.latest_price().unwrap_or_default(),
                prev_close: s.prev_close(),
                volume: s.volume(),
                returns: rets,
            })
            .collect();
        Self::new(entries, covariance)
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        self.entries.iter().map(|e| e.instrument.clone()).collect()
    }

    pub fn expected_returns(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.expected_return()).collect()
    }

    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    pub fn entry(&self, id: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.instrument.id == id)
    }

    /// Universe members with no entry in this snapshot.
    pub fn omitted<'a>(&self, universe: &'a [Instrument]) -> Vec<&'a Instrument> {
        universe.iter().filter(|u| self.entry(&u.id).is_none()).collect()
    }
}

/// Align close histories on their common period keys; when too few keys are
/// shared (mixed calendars), align on the most recent `min_len` closes.
fn align_closes<'a>(series: impl Iterator<Item = &'a PriceSeries> + Clone) -> Vec<Vec<f64>> {
    let mut common: Option<BTreeSet<i64>> = None;
    for s in series.clone() {
        let keys: BTreeSet<i64> = s.keys().collect();
        common = Some(match common {
            None => keys,
            Some(acc) => acc.intersection(&keys).copied().collect(),
        });
    }
    let common = common.unwrap_or_default();

    if common.len() >= MIN_ALIGNED_POINTS {
        return series
            .map(|s| common.iter().filter_map(|k| s.close_at(*k)).collect())
            .collect();
    }

    let min_len = series.clone().map(|s| s.len()).min().unwrap_or(0);
    series
        .map(|s| {
            let closes = s.closes();
            closes[closes.len() - min_len..].to_vec()
        })
        .collect()
}

// =============================================================================
// Selection
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEntry {
    pub instrument: Instrument,
    pub selected: bool,
    pub score: f64,
}

/// Scorer output attached to the snapshot's instruments, in snapshot order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionResult {
    entries: Vec<SelectionEntry>,
}

impl SelectionResult {
    pub fn new(entries: Vec<SelectionEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.iter().filter(|e| e.selected)
    }

    pub fn selected_count(&self) -> usize {
        self.selected().count()
    }

    pub fn selected_ids(&self) -> Vec<&str> {
        self.selected().map(|e| e.instrument.id.as_str()).collect()
    }

    /// Canonical text form used for audit digests.
    pub fn canonical(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}:{}:{:.12}", e.instrument.id, e.selected as u8, e.score))
            .collect::<Vec<_>>()
            .join("|")
    }
}

// =============================================================================
// Signal packets
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    /// Selected instruments go long unless their expected return is negative
    /// (the budget forced them in), in which case they are flagged as sells.
    pub fn for_selection(selected: bool, expected_return: f64) -> Self {
        match (selected, expected_return >= 0.0) {
            (false, _) => SignalKind::Hold,
            (true, true) => SignalKind::Buy,
            (true, false) => SignalKind::Sell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Buy => "BUY",
            SignalKind::Sell => "SELL",
            SignalKind::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalPacket {
    pub emitted_at: DateTime<Utc>,
    pub instrument: Instrument,
    pub price: f64,
    pub signal: SignalKind,
    /// Wall time the scorer took for this cycle.
    pub latency: Duration,
    /// Fraction, -0.02 == -2%.
    pub cumulative_pnl: f64,
}

impl SignalPacket {
    pub fn to_wire(&self) -> WirePacket {
        WirePacket {
            timestamp: self.emitted_at.with_timezone(&Local).format("%H:%M:%S").to_string(),
            ticker: self.instrument.ticker().to_string(),
            price: round2(self.price),
            signal: self.signal,
            latency_us: round2(self.latency.as_secs_f64() * 1_000_000.0),
            pnl: format_pnl(self.cumulative_pnl),
        }
    }
}

/// Subscriber-facing packet layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePacket {
    pub timestamp: String,
    pub ticker: String,
    pub price: f64,
    pub signal: SignalKind,
    pub latency_us: f64,
    pub pnl: String,
}

/// `0.0123` -> `"1.23%"`
pub fn format_pnl(fraction: f64) -> String {
    format!("{:.2}%", round2(fraction * 100.0))
}
