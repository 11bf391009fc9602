/// Sample standard deviation (n - 1 denominator)
///
/// Returns None for fewer than two values.
pub fn calculate_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Down-to-Up Volatility: `ln(std(down returns) / std(up returns))`
///
/// A rising DUVOL means down days are getting more violent than up days.
/// Windows with fewer than two up or two down returns, or with a flat side,
/// have no usable ratio and report 0.0.
pub fn calculate_duvol(returns: &[f64]) -> f64 {
    let up: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let down: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();

    let (Some(up_std), Some(down_std)) = (calculate_std_dev(&up), calculate_std_dev(&down)) else {
        return 0.0;
    };

    if up_std <= 0.0 || down_std <= 0.0 {
        return 0.0;
    }

    (down_std / up_std).ln()
}

/// Negative Coefficient of Skewness
///
/// `-(n (n-1)^{3/2} Σd³) / ((n-1)(n-2) (Σd²)^{3/2})` over demeaned returns `d`.
/// Positive values mean a heavier left tail. Fewer than three returns or zero
/// variance report 0.0.
pub fn calculate_ncskew(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 3 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean = returns.iter().sum::<f64>() / n_f;
    let sum_sq: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum();
    let sum_cube: f64 = returns.iter().map(|r| (r - mean).powi(3)).sum();

    if sum_sq <= f64::EPSILON {
        return 0.0;
    }

    -(n_f * (n_f - 1.0).powf(1.5) * sum_cube) / ((n_f - 1.0) * (n_f - 2.0) * sum_sq.powf(1.5))
}
