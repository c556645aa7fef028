//! P-values for the threshold Wald test

use statrs::function::erf::erfc;

/// Two-sided normal p-value, 2 * Phi(-|z|)
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2).min(1.0)
}

/// Wald statistic against |lfc| <= `threshold` (greaterAbs):
/// sign(lfc) * max(0, (|lfc| - threshold) / se).
///
/// NaN when the standard error is not a positive finite number.
pub fn threshold_wald_statistic(lfc: f64, se: f64, threshold: f64) -> f64 {
    if !(se > 0.0 && se.is_finite()) || !lfc.is_finite() {
        return f64::NAN;
    }
    let excess = (lfc.abs() - threshold).max(0.0);
    lfc.signum() * excess / se
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        let p1 = calculate_pvalue(2.0);
        let p2 = calculate_pvalue(-2.0);
        assert!((p1 - p2).abs() < 1e-10);
    }

    #[test]
    fn test_pvalue_range() {
        for z in [-3.0, -1.0, 0.0, 1.0, 3.0, 40.0] {
            let p = calculate_pvalue(z);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_pvalue_known_values() {
        assert!((calculate_pvalue(0.0) - 1.0).abs() < 1e-10);
        assert!((calculate_pvalue(1.959963984540054) - 0.05).abs() < 1e-9);
        assert!(calculate_pvalue(f64::NAN).is_nan());
    }

    #[test]
    fn test_statistic_inside_threshold_is_zero() {
        assert_eq!(threshold_wald_statistic(0.8, 0.1, 1.0), 0.0);
        assert!((calculate_pvalue(threshold_wald_statistic(-0.5, 0.2, 1.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_statistic_sign_and_scale() {
        assert!((threshold_wald_statistic(3.0, 0.5, 1.0) - 4.0).abs() < 1e-12);
        assert!((threshold_wald_statistic(-3.0, 0.5, 1.0) + 4.0).abs() < 1e-12);
        // zero threshold is the plain Wald test
        assert!((threshold_wald_statistic(1.5, 0.5, 0.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_statistic_nan_for_bad_se() {
        assert!(threshold_wald_statistic(2.0, 0.0, 1.0).is_nan());
        assert!(threshold_wald_statistic(2.0, f64::INFINITY, 1.0).is_nan());
    }
}
