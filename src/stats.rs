//! Statistical utility functions shared across modules
//!
//! Plain estimators over `f64` slices used by the explorer, the size factor
//! estimators and dispersion shrinkage. NaN inputs are the caller's concern:
//! these helpers assume finite data unless stated otherwise.

use std::cmp::Ordering;

/// Scale factor turning a MAD into a consistent estimate of the normal SD
const MAD_CONSTANT: f64 = 1.4826;

/// Arithmetic mean; NaN for an empty slice
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Unbiased sample variance (n - 1 denominator); NaN for fewer than two values
pub fn variance(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Unbiased sample standard deviation
pub fn standard_deviation(x: &[f64]) -> f64 {
    variance(x).sqrt()
}

/// Copy and sort ascending
pub fn sorted(x: &[f64]) -> Vec<f64> {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Linear-interpolation quantile over already sorted data.
/// R's default `quantile(type = 7)`: h = (n - 1) p, interpolate between
/// floor(h) and ceil(h).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 || p.is_nan() {
        return f64::NAN;
    }
    let p = p.clamp(0.0, 1.0);
    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = h - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Linear-interpolation quantile (R type 7)
pub fn quantile(x: &[f64], p: f64) -> f64 {
    quantile_sorted(&sorted(x), p)
}

/// Median (quantile 0.5)
pub fn median(x: &[f64]) -> f64 {
    quantile(x, 0.5)
}

/// Median absolute deviation scaled to the normal SD (R's `mad()`)
pub fn mad(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    let center = median(x);
    let deviations: Vec<f64> = x.iter().map(|&v| (v - center).abs()).collect();
    median(&deviations) * MAD_CONSTANT
}

/// Geometric mean of strictly positive values; NaN if any value is not positive
pub fn geometric_mean(x: &[f64]) -> f64 {
    if x.is_empty() || x.iter().any(|&v| v <= 0.0) {
        return f64::NAN;
    }
    (x.iter().map(|v| v.ln()).sum::<f64>() / x.len() as f64).exp()
}

/// Trigamma function psi'(x) for x > 0.
/// Recurrence up to x >= 10, then the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0))) * x2 / x
}
