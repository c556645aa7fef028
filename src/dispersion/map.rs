//! Maximum a posteriori dispersions shrunk toward the fitted trend

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::gene_wise::{cox_reid_log_likelihood, max_dispersion, maximize_log_alpha, GeneWiseFit};
use super::DispersionParams;
use crate::stats;

/// Floor on the log-normal prior variance
const MIN_PRIOR_VARIANCE: f64 = 0.25;

/// Spread of the gene-wise log dispersions around the trend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorVariance {
    /// mad(log gene-wise - log trend)^2
    pub var_log_disp_ests: f64,
    /// Prior variance after removing the expected sampling variance
    pub prior_var: f64,
}

/// Prior variance of log dispersions.
///
/// The sampling variance of a log dispersion estimate with `m - p` residual
/// degrees of freedom is `trigamma((m - p) / 2)`; what remains of the
/// observed spread is attributed to the prior, floored at 0.25.
pub fn estimate_prior_variance(
    gene_wise: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coef: usize,
    min_disp: f64,
) -> PriorVariance {
    let log_residuals: Vec<f64> = gene_wise
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && g >= 100.0 * min_disp && t > 0.0 && t.is_finite())
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if log_residuals.len() < 3 {
        return PriorVariance {
            var_log_disp_ests: MIN_PRIOR_VARIANCE,
            prior_var: MIN_PRIOR_VARIANCE,
        };
    }

    let var_log_disp_ests = stats::mad(&log_residuals).powi(2);
    let df = n_samples.saturating_sub(n_coef) as f64;
    let prior_var = if df > 0.0 {
        (var_log_disp_ests - stats::trigamma(df / 2.0)).max(MIN_PRIOR_VARIANCE)
    } else {
        MIN_PRIOR_VARIANCE
    };

    log::debug!(
        "Prior variance: df = {}, varLogDispEsts = {:.4}, dispPriorVar = {:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );

    PriorVariance {
        var_log_disp_ests,
        prior_var,
    }
}

/// MAP dispersion of every peak, with the dispersion-outlier flags.
///
/// Peaks whose gene-wise estimate lies more than `outlier_sd` standard
/// deviations above the trend keep their gene-wise value.
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    gene_wise: &[GeneWiseFit],
    trended: &[f64],
    prior: PriorVariance,
    params: &DispersionParams,
) -> (Vec<f64>, Vec<bool>) {
    let max_disp = max_dispersion(counts.ncols());
    let outlier_threshold = params.outlier_sd * prior.var_log_disp_ests.sqrt();

    let results: Vec<(f64, bool)> = (0..counts.nrows())
        .into_par_iter()
        .map(|i| {
            let gene = gene_wise[i].dispersion;
            let trend = trended[i];
            if !gene.is_finite() || !(trend > 0.0) {
                return (f64::NAN, false);
            }
            if gene.ln() - trend.ln() > outlier_threshold {
                return (gene, true);
            }
            let row = counts.row(i).to_vec();
            let map = fit_map_dispersion(&row, design, &gene_wise[i].mu, trend, prior.prior_var, max_disp, params);
            (map, false)
        })
        .collect();

    let n_outliers = results.iter().filter(|(_, o)| *o).count();
    log::info!(
        "MAP dispersions: prior variance {:.4}, {} upper outlier(s) kept gene-wise",
        prior.prior_var,
        n_outliers
    );

    results.into_iter().unzip()
}

/// Maximize the Cox-Reid likelihood plus a normal prior on log(alpha)
/// centred at the trend
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    let log_trend = trend_disp.ln();
    let log_posterior = |a: f64| {
        cox_reid_log_likelihood(counts, design, mu, a) - (a - log_trend).powi(2) / (2.0 * prior_var)
    };
    maximize_log_alpha(log_posterior, params.min_disp.ln(), max_disp.ln(), params)
        .exp()
        .clamp(params.min_disp, max_disp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_prior_variance_floor() {
        let gene = [0.1, 0.11, 0.09, 0.1];
        let trend = [0.1, 0.1, 0.1, 0.1];
        let prior = estimate_prior_variance(&gene, &trend, 6, 2, 1e-8);
        assert_eq!(prior.prior_var, 0.25);
        assert!(prior.var_log_disp_ests < 0.01);
    }

    #[test]
    fn test_prior_variance_large_spread() {
        let gene: Vec<f64> = (0..50).map(|i| 0.1 * ((i as f64 - 25.0) / 5.0).exp()).collect();
        let trend = vec![0.1; 50];
        let prior = estimate_prior_variance(&gene, &trend, 40, 2, 1e-8);
        // df = 38, trigamma(19) ~ 0.054
        assert!(prior.prior_var > 0.25);
        assert!((prior.var_log_disp_ests - prior.prior_var - stats::trigamma(19.0)).abs() < 1e-12);
    }

    #[test]
    fn test_map_lies_between_gene_wise_and_trend() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0]];
        let counts = [100.0, 130.0, 75.0, 40.0, 55.0, 30.0];
        let mu = [101.67, 101.67, 101.67, 41.67, 41.67, 41.67];
        let params = DispersionParams::default();

        let gene = fit_map_dispersion(&counts, &design, &mu, 0.05, 1e6, 10.0, &params);
        let trend = 0.005;
        let map = fit_map_dispersion(&counts, &design, &mu, trend, 0.25, 10.0, &params);
        assert!(map < gene, "map {} gene {}", map, gene);
        assert!(map > trend, "map {} trend {}", map, trend);
    }

    #[test]
    fn test_upper_outliers_keep_gene_wise() {
        let design = array![[1.0], [1.0], [1.0]];
        let counts = array![[10.0, 200.0, 50.0], [0.0, 0.0, 0.0]];
        let gene_wise = vec![
            GeneWiseFit {
                dispersion: 2.0,
                mu: vec![86.7; 3],
            },
            GeneWiseFit {
                dispersion: f64::NAN,
                mu: vec![0.0; 3],
            },
        ];
        let prior = PriorVariance {
            var_log_disp_ests: 0.25,
            prior_var: 0.25,
        };
        let (map, outliers) = estimate_map_dispersions(
            counts.view(),
            &design,
            &gene_wise,
            &[0.01, 0.01],
            prior,
            &DispersionParams::default(),
        );
        assert_eq!(map[0], 2.0);
        assert!(outliers[0]);
        assert!(map[1].is_nan());
        assert!(!outliers[1]);
    }
}
