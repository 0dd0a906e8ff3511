use super::{Problem, SelectionScorer};
use crate::error::{EngineError, EngineResult};

/// Largest universe enumerated exhaustively.
pub const MAX_EXHAUSTIVE: usize = 20;

/// Exact optimum over all `min(n, budget)`-subsets, visited in lexicographic
/// order; the first best subset wins.
#[derive(Debug, Clone)]
pub struct ExhaustiveScorer {
    risk_factor: f64,
}

impl ExhaustiveScorer {
    pub fn new(risk_factor: f64) -> Self {
        Self { risk_factor }
    }
}

/// Advance `combo` to the next k-combination of `0..n`. Returns false after
/// the last one.
fn next_combination(combo: &mut [usize], n: usize) -> bool {
    let k = combo.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if combo[i] < n - k + i {
            combo[i] += 1;
            for j in i + 1..k {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

impl SelectionScorer for ExhaustiveScorer {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn risk_factor(&self) -> f64 {
        self.risk_factor
    }

    fn choose(&self, problem: &Problem<'_>, budget: usize) -> EngineResult<Vec<usize>> {
        let n = problem.len();
        if n > MAX_EXHAUSTIVE {
            return Err(EngineError::ScoringFailure(format!(
                "exhaustive search over {} instruments exceeds {}",
                n, MAX_EXHAUSTIVE
            )));
        }
        let k = budget.min(n);
        let mut combo: Vec<usize> = (0..k).collect();
        let mut best = combo.clone();
        let mut best_value = problem.objective(&combo);
        while next_combination(&mut combo, n) {
            let value = problem.objective(&combo);
            if value > best_value {
                best_value = value;
                best.copy_from_slice(&combo);
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::tests::{chosen, diag};
    use crate::scorer::GreedyScorer;

    #[test]
    fn test_combination_order() {
        let mut c = vec![0, 1];
        let mut seen = vec![c.clone()];
        while next_combination(&mut c, 4) {
            seen.push(c.clone());
        }
        assert_eq!(seen, vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]);
    }

    #[test]
    fn test_beats_greedy_when_greedy_is_myopic() {
        // 0 looks best alone but is strongly correlated with both others
        let mu = [0.10, 0.08, 0.08];
        let cov = vec![
            vec![0.01, 0.05, 0.05],
            vec![0.05, 0.01, -0.02],
            vec![0.05, -0.02, 0.01],
        ];
        let greedy = GreedyScorer::new(1.0).score(&mu, &cov, 2).unwrap();
        let exact = ExhaustiveScorer::new(1.0).score(&mu, &cov, 2).unwrap();
        assert_eq!(chosen(&greedy)[0], 0);
        assert_eq!(chosen(&exact), vec![1, 2]);
    }

    #[test]
    fn test_rejects_large_universe() {
        let n = MAX_EXHAUSTIVE + 1;
        let err = ExhaustiveScorer::new(0.3).score(&vec![0.01; n], &diag(&vec![0.001; n]), 3).unwrap_err();
        assert!(matches!(err, EngineError::ScoringFailure(_)));
    }

    #[test]
    fn test_ties_keep_first_subset() {
        let picks = ExhaustiveScorer::new(0.3).score(&[0.02; 4], &diag(&[0.0; 4]), 2).unwrap();
        assert_eq!(chosen(&picks), vec![0, 1]);
    }
}
