//! Peak-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use statrs::function::gamma::ln_gamma;

use super::DispersionParams;
use crate::glm::{crossprod_weighted, fit_single_peak, least_squares, log_determinant, GlmFitParams, MIN_MU};

/// Points per grid pass in the dispersion search
const GRID_POINTS: usize = 20;
/// Inverse golden ratio
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Gene-wise estimate for one peak with the means it was profiled at
#[derive(Debug, Clone)]
pub struct GeneWiseFit {
    /// NaN for a peak with all-zero counts
    pub dispersion: f64,
    pub mu: Vec<f64>,
}

/// Upper bound of the dispersion search
pub(super) fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// True when the design is a pure group model: one distinct row per column
pub(super) fn is_group_model(design: &Array2<f64>) -> bool {
    let mut unique_rows: Vec<Vec<i64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<i64> = row.iter().map(|&v| (v * 1000.0).round() as i64).collect();
        if !unique_rows.contains(&key) {
            unique_rows.push(key);
        }
    }
    unique_rows.len() == design.ncols()
}

/// Estimate the dispersion of every peak independently
pub fn estimate_gene_wise(
    counts: ArrayView2<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    params: &DispersionParams,
) -> Vec<GeneWiseFit> {
    let sf: Vec<f64> = size_factors.to_vec();
    let xim = sf.iter().map(|s| 1.0 / s).sum::<f64>() / sf.len() as f64;
    let linear_mu = is_group_model(design);

    let fits: Vec<GeneWiseFit> = (0..counts.nrows())
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            fit_peak_dispersion(&row, &sf, design, xim, linear_mu, params)
        })
        .collect();

    log::info!(
        "Gene-wise dispersions: {} of {} peaks estimated",
        fits.iter().filter(|f| f.dispersion.is_finite()).count(),
        fits.len()
    );
    fits
}

fn fit_peak_dispersion(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    linear_mu: bool,
    params: &DispersionParams,
) -> GeneWiseFit {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return GeneWiseFit {
            dispersion: f64::NAN,
            mu: vec![0.0; n],
        };
    }

    let max_disp = max_dispersion(n);
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();

    let alpha_init = rough_dispersion(&normalized, design)
        .min(moments_dispersion(&normalized, xim))
        .clamp(params.min_disp, max_disp);

    let mu = if linear_mu {
        linear_model_mu(&normalized, size_factors, design)
    } else {
        let fit = fit_single_peak(
            ArrayView1::from(counts),
            design,
            ArrayView1::from(size_factors),
            alpha_init,
            &GlmFitParams::default(),
        );
        fit.mu
    };

    let log_alpha = maximize_log_alpha(
        |a| cox_reid_log_likelihood(counts, design, &mu, a),
        params.min_disp.ln(),
        max_disp.ln(),
        params,
    );

    GeneWiseFit {
        dispersion: log_alpha.exp().clamp(params.min_disp, max_disp),
        mu,
    }
}

/// Moment estimate from a least-squares fit of the normalized counts:
/// sum(((y - mu)^2 - mu) / mu^2) / (m - p), floored at 0
fn rough_dispersion(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    let beta = least_squares(design, normalized);
    let sum: f64 = normalized
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let mu = (0..p).map(|j| design[[i, j]] * beta[j]).sum::<f64>().max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / (m - p) as f64).max(0.0)
}

/// (variance - xim * mean) / mean^2
fn moments_dispersion(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    if mean <= 1e-10 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}

/// Group means of normalized counts scaled back by the size factors
fn linear_model_mu(normalized: &[f64], size_factors: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let beta = least_squares(design, normalized);
    (0..normalized.len())
        .map(|i| {
            let mu_norm: f64 = (0..beta.len()).map(|j| design[[i, j]] * beta[j]).sum();
            (mu_norm * size_factors[i]).max(MIN_MU)
        })
        .collect()
}

/// NB log-likelihood in alpha (terms constant in alpha dropped) plus the
/// Cox-Reid term -0.5 log|X'WX| with w = 1 / (1/mu + alpha)
pub(super) fn cox_reid_log_likelihood(counts: &[f64], design: &Array2<f64>, mu: &[f64], log_alpha: f64) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let mut ll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        ll += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
        ll -= y * (m + alpha_inv).ln();
        ll -= alpha_inv * (1.0 + m * alpha).ln();
        weights.push(1.0 / (1.0 / m + alpha));
    }

    let xtwx = crossprod_weighted(design, &weights);
    ll - 0.5 * log_determinant(&xtwx)
}

/// Maximize a function of log(alpha) over `[lo, hi]`: a coarse grid, a fine
/// grid around the best coarse point, then golden-section refinement.
pub(super) fn maximize_log_alpha<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, params: &DispersionParams) -> f64 {
    let best_on_grid = |from: f64, to: f64| -> (f64, f64) {
        let step = (to - from) / (GRID_POINTS - 1) as f64;
        (0..GRID_POINTS)
            .map(|i| from + i as f64 * step)
            .map(|x| (x, f(x)))
            .filter(|(_, v)| v.is_finite())
            .fold((from, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
    };

    let coarse_step = (hi - lo) / (GRID_POINTS - 1) as f64;
    let (coarse, _) = best_on_grid(lo, hi);
    let fine_lo = (coarse - coarse_step).max(lo);
    let fine_hi = (coarse + coarse_step).min(hi);
    let (fine, _) = best_on_grid(fine_lo, fine_hi);

    let fine_step = (fine_hi - fine_lo) / (GRID_POINTS - 1) as f64;
    let mut a = (fine - fine_step).max(lo);
    let mut b = (fine + fine_step).min(hi);
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));

    for _ in 0..params.maxit {
        if (b - a).abs() < params.disp_tol {
            break;
        }
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }

    let refined = 0.5 * (a + b);
    if f(refined) >= f(fine) {
        refined
    } else {
        fine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn group_design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]
    }

    #[test]
    fn test_group_model_detection() {
        assert!(is_group_model(&group_design()));
        let with_covariate = array![[1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0]];
        assert!(!is_group_model(&with_covariate));
    }

    #[test]
    fn test_maximize_finds_interior_optimum() {
        let params = DispersionParams::default();
        let x = maximize_log_alpha(|a| -(a + 2.3).powi(2), -18.0, 2.3, &params);
        assert!((x + 2.3).abs() < 1e-4);
    }

    #[test]
    fn test_noisier_peak_gets_larger_dispersion() {
        let params = DispersionParams::default();
        let counts = array![
            [100.0, 102.0, 98.0, 50.0, 51.0, 49.0],
            [100.0, 160.0, 50.0, 50.0, 90.0, 20.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        ];
        let sf = array![1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let fits = estimate_gene_wise(counts.view(), sf.view(), &group_design(), &params);

        assert!(fits[0].dispersion < fits[1].dispersion);
        assert!(fits[1].dispersion > 0.05);
        assert!(fits[0].dispersion >= params.min_disp);
        assert!(fits[2].dispersion.is_nan());
    }

    #[test]
    fn test_dispersion_close_to_moment_estimate() {
        // one group, normalized counts with var = mean + 0.2 * mean^2
        let design = Array2::ones((8, 1));
        let counts = [60.0, 140.0, 95.0, 110.0, 70.0, 125.0, 88.0, 112.0];
        let sf = [1.0; 8];
        let fit = fit_peak_dispersion(&counts, &sf, &design, 1.0, true, &DispersionParams::default());
        let moments = moments_dispersion(&counts, 1.0);
        assert!(fit.dispersion > 0.0);
        assert!((fit.dispersion.ln() - moments.ln()).abs() < 1.0);
    }
}
