//! Threshold Wald test for differential accessibility

use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use super::contrast::Contrast;
use super::fdr::benjamini_hochberg;
use super::pvalue::{calculate_pvalue, threshold_wald_statistic};
use crate::data::PeakDataSet;
use crate::dispersion::{estimate_dispersions, DispersionEstimates, DispersionMethod, DispersionParams};
use crate::error::{AtacError, Result};
use crate::glm::{fit_peaks, DesignMatrix, DesignSpec, GlmFitParams, PeakFit};
use crate::io::DifferentialResults;
use crate::normalization::{NormalizedCountMatrix, SizeFactors};

/// Model settings for the differential caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialParams {
    pub dispersion_method: DispersionMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

/// Test results plus the fitted quantities behind them
#[derive(Debug, Clone)]
pub struct DifferentialOutput {
    pub results: DifferentialResults,
    pub dispersions: DispersionEstimates,
    pub design: DesignMatrix,
}

/// Call differentially accessible peaks between `contrast.level_a` and
/// `contrast.level_b`.
///
/// Fits the negative binomial model `mu_ij = s_j * exp(x_j b_i)` for every
/// peak and tests H0: |log2FC| <= tau with tau = `contrast.lfc_threshold`:
///   stat = sign(lfc) * max(0, (|lfc| - tau) / se)
///   pvalue = min(1, 2 * Phi(-|stat|))
/// Peaks with no reads in either contrasted group, or whose fit gives no
/// usable standard error, get NaN in the test columns.
pub fn differential_peaks(
    dataset: &PeakDataSet,
    size_factors: &SizeFactors,
    normalized: &NormalizedCountMatrix,
    contrast: &Contrast,
    design_spec: &DesignSpec,
    params: &DifferentialParams,
) -> Result<DifferentialOutput> {
    let counts = dataset.counts();
    let metadata = dataset.metadata();

    if design_spec.factor != contrast.factor {
        return Err(AtacError::contrast(format!(
            "contrast is on '{}' but the design groups by '{}'",
            contrast.factor, design_spec.factor
        )));
    }
    contrast.validate_against(metadata)?;

    if size_factors.sample_ids() != counts.sample_ids() || normalized.sample_ids() != counts.sample_ids() {
        return Err(AtacError::format(
            "size factors and normalized counts must follow the count column order",
        ));
    }
    if normalized.peaks() != counts.peaks() {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} peaks", counts.n_peaks()),
            got: format!("{} normalized peaks", normalized.n_peaks()),
        });
    }

    let design = DesignMatrix::build(design_spec, metadata)?;
    let contrast_vec = design.contrast_vector(&contrast.level_a, &contrast.level_b)?;
    log::info!(
        "Testing {} ({} coefficients: {})",
        contrast,
        design.n_coef(),
        design.coef_names().join(", ")
    );

    let sf = size_factors.values().view();
    let dispersions = estimate_dispersions(
        counts.counts(),
        sf,
        &design,
        params.dispersion_method,
        &params.dispersion,
    )?;

    let in_groups: Vec<usize> = metadata
        .samples_with_level(contrast.factor, &contrast.level_a)
        .into_iter()
        .chain(metadata.samples_with_level(contrast.factor, &contrast.level_b))
        .collect();
    let testable: Vec<usize> = (0..counts.n_peaks())
        .filter(|&i| {
            let row = counts.peak_counts(i);
            dispersions.dispersions[i].is_finite() && in_groups.iter().any(|&j| row[j] > 0.0)
        })
        .collect();
    log::info!(
        "{} of {} peaks are testable",
        testable.len(),
        counts.n_peaks()
    );

    let tested_counts = counts.counts().select(Axis(0), &testable);
    let tested_disp: Vec<f64> = testable.iter().map(|&i| dispersions.dispersions[i]).collect();
    let fits = fit_peaks(tested_counts.view(), design.matrix(), sf, &tested_disp, &params.glm)?;

    let mut results = DifferentialResults::new(counts.peaks().to_vec(), contrast.clone());
    results.base_means = normalized.base_means();
    results.dispersions = dispersions.dispersions.clone();
    results.gene_wise_dispersions = dispersions.gene_wise.clone();
    results.trended_dispersions = dispersions.trended.clone();

    for (&i, fit) in testable.iter().zip(fits.iter()) {
        let (lfc, se) = contrast_log2_fold_change(fit, &contrast_vec);
        let stat = threshold_wald_statistic(lfc, se, contrast.lfc_threshold);
        results.log2_fold_changes[i] = lfc;
        results.lfc_se[i] = se;
        results.stat[i] = stat;
        results.pvalues[i] = calculate_pvalue(stat);
    }
    results.padj = benjamini_hochberg(&results.pvalues);

    let summary = results.summary(0.05);
    log::info!(
        "{} peaks tested, {} with padj < 0.05 ({} higher in {}, {} higher in {})",
        summary.peaks_tested,
        summary.significant,
        summary.opened,
        contrast.level_a,
        summary.closed,
        contrast.level_b
    );

    Ok(DifferentialOutput {
        results,
        dispersions,
        design,
    })
}

/// log2 fold change c'b / ln 2 and its standard error sqrt(c' V c) / ln 2
fn contrast_log2_fold_change(fit: &PeakFit, contrast: &Array1<f64>) -> (f64, f64) {
    let ln2 = std::f64::consts::LN_2;
    let beta = Array1::from(fit.coefficients.clone());
    let lfc = contrast.dot(&beta);
    let var = contrast.dot(&fit.covariance.dot(contrast));
    if !lfc.is_finite() || !(var > 0.0 && var.is_finite()) {
        return (f64::NAN, f64::NAN);
    }
    (lfc / ln2, var.sqrt() / ln2)
}
