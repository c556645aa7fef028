//! Per-peak GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::negative_binomial::{nb_log_density, nb_mean, nb_weight, MAX_ETA, MAX_LFC_BETA, MIN_MU};
use crate::error::{AtacError, Result};

/// Ridge penalty on every coefficient, 1e-6 on the log2 scale
fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change at which IRLS stops
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of the negative binomial GLM for one peak
#[derive(Debug, Clone)]
pub struct PeakFit {
    /// Coefficients on the natural log scale
    pub coefficients: Vec<f64>,
    /// Sandwich covariance of the ridge estimator (natural log scale)
    pub covariance: Array2<f64>,
    pub mu: Vec<f64>,
    pub converged: bool,
    pub log_likelihood: f64,
}

/// Fit every peak (rows of `counts`) in parallel; output order matches input rows
pub fn fit_peaks(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    dispersions: &[f64],
    params: &GlmFitParams,
) -> Result<Vec<PeakFit>> {
    if dispersions.len() != counts.nrows() {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} dispersions", counts.nrows()),
            got: format!("{} dispersions", dispersions.len()),
        });
    }
    if design.nrows() != counts.ncols() || size_factors.len() != counts.ncols() {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} samples", counts.ncols()),
            got: format!("{} design rows, {} size factors", design.nrows(), size_factors.len()),
        });
    }

    let fits: Vec<PeakFit> = (0..counts.nrows())
        .into_par_iter()
        .map(|i| fit_single_peak(counts.row(i), design, size_factors, dispersions[i], params))
        .collect();

    let n_failed = fits.iter().filter(|f| !f.converged).count();
    if n_failed > 0 {
        log::warn!("{} peak(s) did not converge in GLM fitting", n_failed);
    }
    log::info!("Fitted negative binomial GLM for {} peaks", fits.len());

    Ok(fits)
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], row: usize) -> f64 {
    (0..beta.len()).map(|j| design[[row, j]] * beta[j]).sum()
}

fn fitted_means(design: &Array2<f64>, size_factors: ArrayView1<f64>, beta: &[f64]) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| nb_mean(linear_predictor(design, beta, i), size_factors[i]).max(MIN_MU))
        .collect()
}

fn log_likelihood(counts: ArrayView1<f64>, mu: &[f64], alpha: f64) -> f64 {
    let size = 1.0 / alpha;
    counts.iter().zip(mu).map(|(&y, &m)| nb_log_density(y, m, size)).sum()
}

/// Fit a single peak's coefficients for a fixed dispersion
pub fn fit_single_peak(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> PeakFit {
    let n_samples = counts.len();
    let n_coefs = design.ncols();

    // start from least squares on log(normalized count + 0.1)
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let ones = vec![1.0; n_samples];
    let mut beta = weighted_least_squares(design, &ones, &log_counts, 0.0);

    if beta.iter().any(|b| !b.is_finite()) {
        let mean_count = counts.iter().zip(size_factors.iter()).map(|(&c, &s)| c / s).sum::<f64>() / n_samples as f64;
        beta = vec![mean_count.max(0.1).ln(); n_coefs];
    }

    let mut converged = false;
    let mut dev_old = 0.0f64;
    let mut weights = vec![0.0; n_samples];
    let mut working_response = vec![0.0; n_samples];

    for iter in 0..params.maxit {
        let mus = fitted_means(design, size_factors, &beta);
        for i in 0..n_samples {
            weights[i] = nb_weight(mus[i], alpha);
            working_response[i] = (mus[i] / size_factors[i]).ln() + (counts[i] - mus[i]) / mus[i];
        }

        beta = weighted_least_squares(design, &weights, &working_response, ridge_lambda());

        if beta.iter().any(|&b| b.abs() > MAX_LFC_BETA || !b.is_finite()) {
            break;
        }

        let mus = fitted_means(design, size_factors, &beta);
        let dev = -2.0 * log_likelihood(counts, &mus, alpha);
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let stable = beta.iter().all(|b| b.is_finite() && b.abs() <= MAX_LFC_BETA);
    if !converged || !stable {
        let start = if stable { Some(beta.as_slice()) } else { None };
        let fallback = fit_single_peak_coordinate(counts, design, size_factors, alpha, start);
        log::debug!(
            "IRLS did not converge; coordinate ascent fallback converged = {}",
            fallback.converged
        );
        return fallback;
    }

    finish_fit(counts, design, size_factors, alpha, beta, converged)
}

/// Coordinate-wise Newton ascent on the NB log-likelihood with Armijo
/// backtracking. Used when IRLS diverges.
fn fit_single_peak_coordinate(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    initial_beta: Option<&[f64]>,
) -> PeakFit {
    const MAX_ITER: usize = 5000;
    const TOL: f64 = 1e-8;
    const ARMIJO_C: f64 = 1e-4;

    let n_samples = counts.len();
    let n_coefs = design.ncols();

    let mut beta: Vec<f64> = match initial_beta {
        Some(b) => b.to_vec(),
        None => {
            let mean_count =
                counts.iter().zip(size_factors.iter()).map(|(&c, &s)| c / s).sum::<f64>() / n_samples as f64;
            vec![mean_count.max(0.1).ln(); n_coefs]
        }
    };

    let compute_ll = |beta: &[f64]| -> f64 {
        let mus: Vec<f64> = (0..n_samples)
            .map(|i| {
                let eta = linear_predictor(design, beta, i).clamp(-MAX_ETA, MAX_ETA);
                (size_factors[i] * eta.exp()).max(MIN_MU)
            })
            .collect();
        log_likelihood(counts, &mus, alpha)
    };

    let mut ll_old = compute_ll(&beta);
    let mut converged = false;

    for _ in 0..MAX_ITER {
        let ll_start = ll_old;

        for j in 0..n_coefs {
            let mus = fitted_means(design, size_factors, &beta);
            let mut grad = 0.0;
            let mut hess = 0.0;
            for i in 0..n_samples {
                grad += (counts[i] - mus[i]) / (1.0 + alpha * mus[i]) * design[[i, j]];
                hess -= nb_weight(mus[i], alpha) * design[[i, j]] * design[[i, j]];
            }
            if hess.abs() < 1e-20 {
                continue;
            }
            let delta = -grad / hess;
            if delta.abs() < 1e-14 {
                continue;
            }

            let beta_j_old = beta[j];
            let mut step = 1.0;
            let mut improved = false;
            for _ in 0..30 {
                beta[j] = (beta_j_old + step * delta).clamp(-MAX_LFC_BETA, MAX_LFC_BETA);
                let ll_new = compute_ll(&beta);
                if ll_new >= ll_old + ARMIJO_C * step * grad * delta {
                    ll_old = ll_new;
                    improved = true;
                    break;
                }
                step *= 0.5;
            }
            if !improved {
                beta[j] = beta_j_old;
            }
        }

        if (ll_old - ll_start).abs() / (ll_old.abs() + 0.1) < TOL {
            converged = true;
            break;
        }
    }

    finish_fit(counts, design, size_factors, alpha, beta, converged)
}

fn finish_fit(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    beta: Vec<f64>,
    converged: bool,
) -> PeakFit {
    let mu = fitted_means(design, size_factors, &beta);
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let covariance = sandwich_covariance(design, &weights);
    let log_likelihood = log_likelihood(counts, &mu, alpha);

    PeakFit {
        coefficients: beta,
        covariance,
        mu,
        converged,
        log_likelihood,
    }
}

/// X'WX as a dense matrix
pub(crate) fn crossprod_weighted(design: &Array2<f64>, weights: &[f64]) -> Array2<f64> {
    let n_coefs = design.ncols();
    let mut xtwx = Array2::zeros((n_coefs, n_coefs));
    for (i, &w) in weights.iter().enumerate() {
        for j in 0..n_coefs {
            for k in 0..n_coefs {
                xtwx[[j, k]] += w * design[[i, j]] * design[[i, k]];
            }
        }
    }
    xtwx
}

/// Ordinary least squares coefficients
pub(crate) fn least_squares(design: &Array2<f64>, response: &[f64]) -> Vec<f64> {
    let ones = vec![1.0; response.len()];
    weighted_least_squares(design, &ones, response, 0.0)
}

/// Solve (X'WX + lambda I) beta = X'Wz
fn weighted_least_squares(design: &Array2<f64>, weights: &[f64], response: &[f64], lambda: f64) -> Vec<f64> {
    let n_coefs = design.ncols();
    let mut xtwx = crossprod_weighted(design, weights);
    for j in 0..n_coefs {
        xtwx[[j, j]] += lambda;
    }

    let mut xtwz = vec![0.0; n_coefs];
    for (i, (&w, &z)) in weights.iter().zip(response).enumerate() {
        for j in 0..n_coefs {
            xtwz[j] += w * design[[i, j]] * z;
        }
    }

    solve_symmetric_system(&xtwx, &xtwz)
}

/// Lower Cholesky factor; non-positive pivots are floored at 1e-12
fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                l[[i, j]] = sum.max(1e-12).sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    l
}

/// log|A| for a symmetric positive definite matrix
pub(crate) fn log_determinant(a: &Array2<f64>) -> f64 {
    let l = cholesky(a);
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

fn solve_symmetric_system(a: &Array2<f64>, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let l = cholesky(a);

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

fn invert_symmetric_matrix(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut result = Array2::zeros((n, n));
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        let col = solve_symmetric_system(a, &e);
        for j in 0..n {
            result[[j, i]] = col[j];
        }
    }
    result
}

/// (X'WX + lambda)^-1 X'WX (X'WX + lambda)^-1
fn sandwich_covariance(design: &Array2<f64>, weights: &[f64]) -> Array2<f64> {
    let xtwx = crossprod_weighted(design, weights);
    let mut ridged = xtwx.clone();
    for j in 0..ridged.nrows() {
        ridged[[j, j]] += ridge_lambda();
    }
    let inv = invert_symmetric_matrix(&ridged);
    inv.dot(&xtwx).dot(&inv)
}
