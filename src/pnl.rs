//! Per-cycle P&L increments fed to the drawdown gate.
//!
//! All values are fractions of capital: `-0.02` is a 2% loss.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::error::EngineError;
use crate::model::{MarketSnapshot, SelectionResult};

pub trait PnlModel: Send {
    fn name(&self) -> &'static str;
    fn delta(&mut self, selection: &SelectionResult, snapshot: &MarketSnapshot) -> f64;
}

impl<F> PnlModel for F
where
    F: FnMut(&SelectionResult, &MarketSnapshot) -> f64 + Send,
{
    fn name(&self) -> &'static str {
        "custom"
    }

    fn delta(&mut self, selection: &SelectionResult, snapshot: &MarketSnapshot) -> f64 {
        self(selection, snapshot)
    }
}

/// Equal-weighted last-period return of the selected instruments.
#[derive(Debug, Default, Clone)]
pub struct LastReturnPnl;

impl PnlModel for LastReturnPnl {
    fn name(&self) -> &'static str {
        "last_return"
    }

    fn delta(&mut self, selection: &SelectionResult, snapshot: &MarketSnapshot) -> f64 {
        let returns: Vec<f64> = selection
            .selected()
            .filter_map(|e| snapshot.entry(&e.instrument.id))
            .filter_map(|e| e.last_return())
            .collect();
        if returns.is_empty() {
            return 0.0;
        }
        returns.iter().sum::<f64>() / returns.len() as f64
    }
}

/// Simulated P&L: one seeded uniform draw in `[low, high]` per selected
/// instrument, summed.
#[derive(Debug, Clone)]
pub struct RandomWalkPnl {
    rng: StdRng,
    low: f64,
    high: f64,
}

impl RandomWalkPnl {
    pub fn new(seed: u64, low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self { rng: StdRng::seed_from_u64(seed), low, high }
    }
}

impl PnlModel for RandomWalkPnl {
    fn name(&self) -> &'static str {
        "random_walk"
    }

    fn delta(&mut self, selection: &SelectionResult, _snapshot: &MarketSnapshot) -> f64 {
        (0..selection.selected_count())
            .map(|_| self.rng.gen_range(self.low..=self.high))
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PnlModelKind {
    LastReturn,
    RandomWalk,
}

impl PnlModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PnlModelKind::LastReturn => "last_return",
            PnlModelKind::RandomWalk => "random_walk",
        }
    }

    pub fn build(self, cfg: &Config) -> Box<dyn PnlModel> {
        match self {
            PnlModelKind::LastReturn => Box::new(LastReturnPnl),
            PnlModelKind::RandomWalk => {
                Box::new(RandomWalkPnl::new(cfg.seed, cfg.random_walk_low, cfg.random_walk_high))
            }
        }
    }
}

impl FromStr for PnlModelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "last_return" => Ok(PnlModelKind::LastReturn),
            "random_walk" | "random" => Ok(PnlModelKind::RandomWalk),
            other => Err(EngineError::Config(format!("unknown pnl model {}", other))),
        }
    }
}
