//! Variance stabilizing transformation
//!
//! Maps normalized counts to an approximately homoskedastic log2-like scale
//! using the closed form that follows from the fitted dispersion trend.
//! Intended for PCA and heatmaps, never for testing.

use crate::data::CountMatrix;
use crate::dispersion::{estimate_dispersions, DispersionMethod, DispersionParams, DispersionTrend};
use crate::error::Result;
use crate::glm::DesignMatrix;
use crate::normalization::{NormalizedCountMatrix, SizeFactors};

/// Transformed values with the trend that produced them
#[derive(Debug, Clone)]
pub struct VstResult {
    /// Same peaks and samples as the input, on the VST scale
    pub data: NormalizedCountMatrix,
    pub trend: DispersionTrend,
}

/// Transform normalized counts with a known dispersion trend.
///
/// Parametric trend a0 + a1 / q:
///   log2((1 + a1 + 2 a0 q + 2 sqrt(a0 q (1 + a1 + a0 q))) / (4 a0))
/// Constant dispersion a:
///   (2 asinh(sqrt(a q)) - ln(a) - ln(4)) / ln(2)
pub fn vst(normalized: &NormalizedCountMatrix, trend: &DispersionTrend) -> VstResult {
    let data = match *trend {
        DispersionTrend::Parametric { asympt_disp, extra_pois } => {
            normalized.map_values(|q| vst_parametric_single(q, asympt_disp, extra_pois))
        }
        DispersionTrend::Mean { dispersion } => normalized.map_values(|q| vst_mean_single(q, dispersion)),
    };
    VstResult { data, trend: *trend }
}

/// Fit the dispersion trend ignoring the sample groups (intercept-only
/// design) and transform with it.
pub fn blind_vst(
    counts: &CountMatrix,
    size_factors: &SizeFactors,
    normalized: &NormalizedCountMatrix,
    params: &DispersionParams,
) -> Result<VstResult> {
    let design = DesignMatrix::intercept(counts.n_samples());
    let estimates = estimate_dispersions(
        counts.counts(),
        size_factors.values().view(),
        &design,
        DispersionMethod::GeneWise,
        params,
    )?;
    log::info!("VST with blind dispersion trend {:?}", estimates.trend);
    Ok(vst(normalized, &estimates.trend))
}

fn vst_parametric_single(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let a = asympt_disp;
    let e = extra_pois;
    let q = q.max(0.0);

    let numerator = 1.0 + e + 2.0 * a * q + 2.0 * (a * q * (1.0 + e + a * q)).sqrt();
    let denominator = 4.0 * a;

    if numerator > 0.0 && denominator > 0.0 {
        (numerator / denominator).log2()
    } else {
        0.0
    }
}

fn vst_mean_single(q: f64, alpha: f64) -> f64 {
    if alpha <= 0.0 {
        return 0.0;
    }
    let q = q.max(0.0);
    let asinh_term = 2.0 * (alpha * q).sqrt().asinh();
    (asinh_term - alpha.ln() - 4.0_f64.ln()) / std::f64::consts::LN_2
}
