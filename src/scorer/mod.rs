//! Budgeted instrument selection.
//!
//! Every scorer approximately maximises
//! `Σ μ_i x_i − q Σ σ_ij x_i x_j` subject to `Σ x_i <= budget`.

use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::model::{MarketSnapshot, SelectionEntry, SelectionResult};

mod annealing;
mod exhaustive;
mod greedy;

pub use annealing::AnnealingScorer;
pub use exhaustive::ExhaustiveScorer;
pub use greedy::GreedyScorer;

/// Validated scoring inputs plus the objective they define.
#[derive(Debug)]
pub struct Problem<'a> {
    pub mu: &'a [f64],
    pub cov: &'a [Vec<f64>],
    pub risk_factor: f64,
}

impl<'a> Problem<'a> {
    pub fn new(mu: &'a [f64], cov: &'a [Vec<f64>], risk_factor: f64) -> EngineResult<Self> {
        let n = mu.len();
        if cov.len() != n || cov.iter().any(|row| row.len() != n) {
            return Err(EngineError::ScoringFailure(format!(
                "covariance is not {}x{}",
                n, n
            )));
        }
        if mu.iter().chain(cov.iter().flatten()).any(|x| !x.is_finite()) {
            return Err(EngineError::ScoringFailure("non-finite input".to_string()));
        }
        if !risk_factor.is_finite() {
            return Err(EngineError::ScoringFailure("non-finite risk factor".to_string()));
        }
        Ok(Self { mu, cov, risk_factor })
    }

    pub fn len(&self) -> usize {
        self.mu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    /// Objective of instrument `i` held alone.
    pub fn standalone(&self, i: usize) -> f64 {
        self.mu[i] - self.risk_factor * self.cov[i][i]
    }

    /// Objective change from adding `i` to `chosen`.
    pub fn gain(&self, i: usize, chosen: &[usize]) -> f64 {
        let cross: f64 = chosen.iter().map(|&j| self.cov[i][j]).sum();
        self.mu[i] - self.risk_factor * (self.cov[i][i] + 2.0 * cross)
    }

    pub fn objective(&self, chosen: &[usize]) -> f64 {
        let ret: f64 = chosen.iter().map(|&i| self.mu[i]).sum();
        let risk: f64 = chosen
            .iter()
            .flat_map(|&i| chosen.iter().map(move |&j| (i, j)))
            .map(|(i, j)| self.cov[i][j])
            .sum();
        ret - self.risk_factor * risk
    }
}

/// One scorer output row, aligned with the input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pick {
    pub selected: bool,
    pub score: f64,
}

pub trait SelectionScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn risk_factor(&self) -> f64;

    /// Indices of the chosen instruments; at most `budget` of them.
    fn choose(&self, problem: &Problem<'_>, budget: usize) -> EngineResult<Vec<usize>>;

    /// Score `n` instruments. Output has one row per input, in input order.
    fn score(&self, expected_returns: &[f64], covariance: &[Vec<f64>], budget: usize) -> EngineResult<Vec<Pick>> {
        let problem = Problem::new(expected_returns, covariance, self.risk_factor())?;
        let n = problem.len();
        let chosen = if n == 0 || budget == 0 {
            Vec::new()
        } else {
            self.choose(&problem, budget)?
        };

        let mut selected = vec![false; n];
        for &i in &chosen {
            if i >= n || selected[i] {
                return Err(EngineError::ScoringFailure(format!(
                    "{} returned invalid index {}",
                    self.name(),
                    i
                )));
            }
            selected[i] = true;
        }
        if chosen.len() > budget {
            return Err(EngineError::ScoringFailure(format!(
                "{} selected {} over budget {}",
                self.name(),
                chosen.len(),
                budget
            )));
        }

        Ok((0..n)
            .map(|i| Pick { selected: selected[i], score: problem.standalone(i) })
            .collect())
    }
}

/// Run `scorer` over a snapshot and attach the picks to its instruments.
pub fn select(scorer: &dyn SelectionScorer, snapshot: &MarketSnapshot, budget: usize) -> EngineResult<SelectionResult> {
    let picks = scorer.score(&snapshot.expected_returns(), snapshot.covariance(), budget)?;
    if picks.len() != snapshot.len() {
        return Err(EngineError::ScoringFailure(format!(
            "{} returned {} rows for {} instruments",
            scorer.name(),
            picks.len(),
            snapshot.len()
        )));
    }
    let entries = snapshot
        .entries()
        .iter()
        .zip(picks)
        .map(|(e, p)| SelectionEntry { instrument: e.instrument.clone(), selected: p.selected, score: p.score })
        .collect();
    Ok(SelectionResult::new(entries))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScorerKind {
    Greedy,
    Exhaustive,
    Annealing,
}

impl ScorerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScorerKind::Greedy => "greedy",
            ScorerKind::Exhaustive => "exhaustive",
            ScorerKind::Annealing => "annealing",
        }
    }

    pub fn build(self, cfg: &Config) -> Arc<dyn SelectionScorer> {
        match self {
            ScorerKind::Greedy => Arc::new(GreedyScorer::new(cfg.risk_factor)),
            ScorerKind::Exhaustive => Arc::new(ExhaustiveScorer::new(cfg.risk_factor)),
            ScorerKind::Annealing => Arc::new(AnnealingScorer::new(cfg.risk_factor, cfg.seed, cfg.anneal_iterations)),
        }
    }
}

impl FromStr for ScorerKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(ScorerKind::Greedy),
            "exhaustive" => Ok(ScorerKind::Exhaustive),
            "annealing" | "quantum" => Ok(ScorerKind::Annealing),
            other => Err(EngineError::Config(format!("unknown scorer {}", other))),
        }
    }
}
