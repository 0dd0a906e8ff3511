use super::{Problem, SelectionScorer};
use crate::error::EngineResult;

/// Reference scorer: repeatedly add the instrument with the best marginal
/// objective gain. Deterministic; ties go to the lower index.
#[derive(Debug, Clone)]
pub struct GreedyScorer {
    risk_factor: f64,
}

impl GreedyScorer {
    pub fn new(risk_factor: f64) -> Self {
        Self { risk_factor }
    }
}

pub(super) fn greedy_choice(problem: &Problem<'_>, budget: usize) -> Vec<usize> {
    let k = budget.min(problem.len());
    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    let mut taken = vec![false; problem.len()];

    while chosen.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for i in (0..problem.len()).filter(|&i| !taken[i]) {
            let gain = problem.gain(i, &chosen);
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((i, gain));
            }
        }
        match best {
            Some((i, _)) => {
                taken[i] = true;
                chosen.push(i);
            }
            None => break,
        }
    }
    chosen.sort_unstable();
    chosen
}

impl SelectionScorer for GreedyScorer {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn risk_factor(&self) -> f64 {
        self.risk_factor
    }

    fn choose(&self, problem: &Problem<'_>, budget: usize) -> EngineResult<Vec<usize>> {
        Ok(greedy_choice(problem, budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::tests::{chosen, diag};

    #[test]
    fn test_ties_prefer_earlier_instrument() {
        let picks = GreedyScorer::new(0.3).score(&[0.02, 0.02, 0.02], &diag(&[0.0; 3]), 2).unwrap();
        assert_eq!(chosen(&picks), vec![0, 1]);
    }

    #[test]
    fn test_covariance_steers_away_from_correlated_pair() {
        // 0 and 1 move together; 2 is independent with a slightly lower return
        let mu = [0.05, 0.049, 0.045];
        let cov = vec![
            vec![0.01, 0.01, 0.0],
            vec![0.01, 0.01, 0.0],
            vec![0.0, 0.0, 0.01],
        ];
        let picks = GreedyScorer::new(1.0).score(&mu, &cov, 2).unwrap();
        assert_eq!(chosen(&picks), vec![0, 2]);
    }

    #[test]
    fn test_budget_above_universe_selects_everything() {
        let picks = GreedyScorer::new(0.3).score(&[0.01, -0.5], &diag(&[0.1, 0.1]), 4).unwrap();
        assert_eq!(chosen(&picks), vec![0, 1]);
    }
}
