//! Return and covariance estimates used to build market snapshots.

/// Simple period returns `c_t / c_{t-1} - 1`. Pairs with a non-positive
/// previous close are skipped.
pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample variance (n-1 denominator); zero for fewer than two observations.
pub fn sample_variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0)
}

/// Sample covariance matrix of equally long return series.
///
/// Series are truncated to the shortest length (keeping the most recent
/// observations) so callers can pass slightly ragged input.
pub fn sample_covariance(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = series.len();
    let len = series.iter().map(|s| s.len()).min().unwrap_or(0);
    let tails: Vec<&[f64]> = series.iter().map(|s| &s[s.len() - len..]).collect();
    let means: Vec<f64> = tails.iter().map(|s| mean(s)).collect();

    let mut cov = vec![vec![0.0; n]; n];
    if len < 2 {
        return cov;
    }
    let denom = len as f64 - 1.0;
    for i in 0..n {
        for j in i..n {
            let c = tails[i]
                .iter()
                .zip(tails[j].iter())
                .map(|(a, b)| (a - means[i]) * (b - means[j]))
                .sum::<f64>()
                / denom;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}

pub fn round2(x: f64) -> f64 {
    let r = (x * 100.0).round() / 100.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_returns() {
        let r = simple_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.10).abs() < 1e-12);
        assert!((r[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_returns_skip_zero_previous() {
        assert_eq!(simple_returns(&[0.0, 5.0, 10.0]), vec![1.0]);
    }

    #[test]
    fn test_covariance_matches_variance_on_diagonal() {
        let a = vec![0.01, -0.02, 0.03, 0.00];
        let b = vec![0.02, -0.04, 0.06, 0.00];
        let cov = sample_covariance(&[a.clone(), b]);
        assert!((cov[0][0] - sample_variance(&a)).abs() < 1e-15);
        // b = 2a so cov(a, b) = 2 var(a) and var(b) = 4 var(a)
        assert!((cov[0][1] - 2.0 * cov[0][0]).abs() < 1e-15);
        assert!((cov[1][1] - 4.0 * cov[0][0]).abs() < 1e-15);
        assert_eq!(cov[0][1], cov[1][0]);
    }

    #[test]
    fn test_covariance_degenerate_inputs() {
        let cov = sample_covariance(&[vec![0.01], vec![0.02]]);
        assert_eq!(cov, vec![vec![0.0, 0.0], vec![0.0, 0.0]]);
        assert!(sample_covariance(&[]).is_empty());
    }

    #[test]
    fn test_round2_normalises_negative_zero() {
        assert_eq!(round2(2456.349), 2456.35);
        assert_eq!(round2(-0.001).to_string(), "0");
    }
}
