//! Dispersion estimation for the negative binomial peak model
//!
//! Three steps, each a pure function of the previous one: Cox-Reid
//! gene-wise estimates, a dispersion-mean trend, and MAP shrinkage of the
//! gene-wise estimates toward that trend.

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_gene_wise, GeneWiseFit};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, PriorVariance};
pub use trend::{fit_dispersion_trend, DispersionTrend};

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AtacError, Result};
use crate::glm::DesignMatrix;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on every dispersion
    pub min_disp: f64,
    /// Width in log(alpha) at which the line search stops
    pub disp_tol: f64,
    /// Maximum refinement iterations per peak
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Which dispersion enters the Wald test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionMethod {
    /// Unshrunk Cox-Reid estimate per peak
    GeneWise,
    /// Gene-wise estimates shrunk toward the trend
    #[default]
    Map,
}

/// Every dispersion quantity of a run, in peak order
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub base_means: Vec<f64>,
    pub gene_wise: Vec<f64>,
    pub trend: DispersionTrend,
    pub trended: Vec<f64>,
    pub prior: Option<PriorVariance>,
    /// Dispersions used for testing; NaN for all-zero peaks
    pub dispersions: Vec<f64>,
    pub outliers: Vec<bool>,
}

/// Estimate dispersions for every peak of a count matrix
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: ArrayView1<f64>,
    design: &DesignMatrix,
    method: DispersionMethod,
    params: &DispersionParams,
) -> Result<DispersionEstimates> {
    let (n_peaks, n_samples) = counts.dim();
    if design.n_samples() != n_samples || size_factors.len() != n_samples {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} samples", n_samples),
            got: format!("{} design rows, {} size factors", design.n_samples(), size_factors.len()),
        });
    }
    if n_samples <= design.n_coef() {
        return Err(AtacError::insufficient(
            "the design has as many coefficients as samples; no replicates for dispersion estimation",
        ));
    }
    if n_peaks == 0 {
        return Err(AtacError::insufficient("no peaks to estimate dispersions for"));
    }

    let mut normalized = counts.to_owned();
    for (mut col, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|x| x / sf);
    }
    let base_means: Vec<f64> = normalized
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();

    let fits = estimate_gene_wise(counts, size_factors, design.matrix(), params);
    let gene_wise: Vec<f64> = fits.iter().map(|f| f.dispersion).collect();

    let trend = fit_dispersion_trend(&base_means, &gene_wise, params.min_disp)?;
    let trended: Vec<f64> = base_means.iter().map(|&m| trend.evaluate(m)).collect();

    let (dispersions, outliers, prior) = match method {
        DispersionMethod::GeneWise => (gene_wise.clone(), vec![false; n_peaks], None),
        DispersionMethod::Map => {
            let prior = estimate_prior_variance(&gene_wise, &trended, n_samples, design.n_coef(), params.min_disp);
            let (map, outliers) = estimate_map_dispersions(counts, design.matrix(), &fits, &trended, prior, params);
            (map, outliers, Some(prior))
        }
    };

    Ok(DispersionEstimates {
        base_means,
        gene_wise,
        trend,
        trended,
        prior,
        dispersions,
        outliers,
    })
}
