use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::greedy::greedy_choice;
use super::{Problem, SelectionScorer};
use crate::error::EngineResult;

/// Stochastic sampler over fixed-size subsets: swap one held instrument for
/// one outside the set, accept with the Metropolis rule under a geometric
/// cooling schedule. Starts from the greedy answer and never returns anything
/// worse. Each call reseeds, so equal inputs give equal output.
#[derive(Debug, Clone)]
pub struct AnnealingScorer {
    risk_factor: f64,
    seed: u64,
    iterations: usize,
}

const FINAL_TEMPERATURE_RATIO: f64 = 1e-3;

impl AnnealingScorer {
    pub fn new(risk_factor: f64, seed: u64, iterations: usize) -> Self {
        Self { risk_factor, seed, iterations }
    }

    fn initial_temperature(problem: &Problem<'_>) -> f64 {
        let scale = (0..problem.len())
            .map(|i| problem.standalone(i).abs())
            .fold(0.0, f64::max);
        scale.max(1e-9) * 0.1
    }
}

impl SelectionScorer for AnnealingScorer {
    fn name(&self) -> &'static str {
        "annealing"
    }

    fn risk_factor(&self) -> f64 {
        self.risk_factor
    }

    fn choose(&self, problem: &Problem<'_>, budget: usize) -> EngineResult<Vec<usize>> {
        let n = problem.len();
        let start = greedy_choice(problem, budget);
        let k = start.len();
        if k == 0 || k == n || self.iterations == 0 {
            return Ok(start);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut inside = start.clone();
        let mut outside: Vec<usize> = (0..n).filter(|i| !inside.contains(i)).collect();
        let mut current = problem.objective(&inside);
        let mut best = inside.clone();
        let mut best_value = current;

        let t0 = Self::initial_temperature(problem);
        let cooling = FINAL_TEMPERATURE_RATIO.powf(1.0 / self.iterations as f64);
        let mut temperature = t0;

        for _ in 0..self.iterations {
            let a = rng.gen_range(0..k);
            let b = rng.gen_range(0..outside.len());
            std::mem::swap(&mut inside[a], &mut outside[b]);
            let candidate = problem.objective(&inside);
            let delta = candidate - current;
            if delta >= 0.0 || rng.gen::<f64>() < (delta / temperature).exp() {
                current = candidate;
                if current > best_value {
                    best_value = current;
                    best.copy_from_slice(&inside);
                }
            } else {
                std::mem::swap(&mut inside[a], &mut outside[b]);
            }
            temperature *= cooling;
        }

        best.sort_unstable();
        Ok(best)
    }
}
