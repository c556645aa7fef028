//! Dispersion-mean trend fitting

use serde::Serialize;

use crate::error::{AtacError, Result};

/// Fitted dispersion as a function of mean normalized count
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispersionTrend {
    /// dispersion = asympt_disp + extra_pois / mean
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// One dispersion for every peak
    Mean { dispersion: f64 },
}

impl DispersionTrend {
    /// Trended dispersion at a given mean normalized count
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean { dispersion } => dispersion,
        }
    }
}

/// Fit the parametric trend, falling back to the mean of the usable
/// gene-wise estimates when the gamma fit fails.
///
/// Only estimates above `100 * min_disp` take part, so peaks pinned at the
/// lower bound do not drag the fit down.
pub fn fit_dispersion_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    match fit_parametric(&usable) {
        Ok((asympt_disp, extra_pois)) => {
            log::info!(
                "Parametric dispersion trend: asymptDisp = {:.4e}, extraPois = {:.4}",
                asympt_disp,
                extra_pois
            );
            Ok(DispersionTrend::Parametric { asympt_disp, extra_pois })
        }
        Err(e) => {
            log::warn!("{}; using the mean dispersion as the trend", e);
            fit_mean_trend(&usable, dispersions, min_disp)
        }
    }
}

fn fit_mean_trend(usable: &[(f64, f64)], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let values: Vec<f64> = if usable.is_empty() {
        dispersions.iter().copied().filter(|d| d.is_finite()).collect()
    } else {
        usable.iter().map(|&(_, d)| d).collect()
    };
    if values.is_empty() {
        return Err(AtacError::insufficient("no peak has a finite dispersion estimate"));
    }
    let dispersion = (values.iter().sum::<f64>() / values.len() as f64).max(min_disp);
    log::info!("Mean dispersion trend: {:.4e}", dispersion);
    Ok(DispersionTrend::Mean { dispersion })
}

/// Iterated gamma-family fit of `disp ~ a0 + a1 / mean` with residual
/// filtering (0.0001 < disp / fitted < 15)
fn fit_parametric(data: &[(f64, f64)]) -> Result<(f64, f64)> {
    const MAX_ITER: usize = 11;
    const TOL: f64 = 1e-6;

    if data.len() < 3 {
        return Err(AtacError::insufficient(
            "not enough usable dispersion estimates for a parametric trend",
        ));
    }

    let mut coefs = (0.1_f64, 1.0_f64);

    for iter in 0..MAX_ITER {
        let old = coefs;

        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                fitted > 0.0 && disp / fitted > 1e-4 && disp / fitted < 15.0
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(AtacError::insufficient(
                "too few peaks with well-behaved residuals for a parametric trend",
            ));
        }

        let (new_coefs, glm_converged) = fit_gamma_identity(&good, coefs);
        coefs = new_coefs;
        log::debug!(
            "Parametric trend iteration {}: {} peaks, a0 = {:.6}, a1 = {:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(AtacError::insufficient(format!(
                "parametric dispersion coefficients not positive (a0 = {:.4}, a1 = {:.4})",
                coefs.0, coefs.1
            )));
        }

        let log_change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if log_change < TOL && glm_converged {
            return Ok(coefs);
        }
    }

    Err(AtacError::insufficient("parametric dispersion fit did not converge"))
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma GLM with identity link, `y ~ 1 + 1/x`, by IRLS from `start`.
/// Returns the coefficients and whether the deviance converged.
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            break;
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }

    ((a0, a1), false)
}
