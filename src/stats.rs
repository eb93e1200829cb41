//! Statistics shared by model simplification, tree pruning and rule construction

/// Pessimistic estimate of the error of a model with `p` parameters fitted to `n` cases
///
/// `v` is the observed error; the estimate grows with the number of parameters and equals `v`
/// when there are none. The parameter count is clamped below the number of cases.
pub fn estimate_err(v: f64, n: f64, p: f64) -> f64 {
    let p = if p >= n { n - 1.0 } else { p };

    v * (n + p) / (n - p)
}

/// Standard deviation from a case count and the sums of values and their squares
///
/// Fewer than two cases fall back to `global_sd`.
pub fn sd(n: f64, sum: f64, sum_sq: f64, global_sd: f64) -> f64 {
    if n < 2.0 {
        global_sd
    } else {
        ((sum_sq - sum * sum / n + 1e-3) / (n - 1.0)).max(0.0).sqrt()
    }
}

/// Largest number of decimal places needed to write any of `values`, at most six
pub fn decimals(values: impl IntoIterator<Item = f64>) -> usize {
    const MAX_DECIMALS: usize = 6;

    let mut most = 0;
    for v in values {
        while most < MAX_DECIMALS {
            let scaled = v * 10f64.powi(most as i32);
            if (scaled - scaled.round()).abs() <= 1e-9 * scaled.abs().max(1.0) {
                break;
            }
            most += 1;
        }
    }

    most
}
