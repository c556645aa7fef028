//! Tables behind the standard plots
//!
//! Rendering is left to external tools; these functions produce the data
//! for an MA plot and a heatmap of significant peaks.

use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::data::Peak;
use crate::error::{AtacError, Result};
use crate::io::DifferentialResults;
use crate::normalization::NormalizedCountMatrix;

/// One point of the MA plot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaPoint {
    pub peak: Peak,
    pub base_mean: f64,
    pub log2_fold_change: f64,
    pub significant: bool,
}

/// Peaks with a finite fold change, flagged by padj < alpha
pub fn ma_points(results: &DifferentialResults, alpha: f64) -> Vec<MaPoint> {
    (0..results.n_peaks())
        .filter(|&i| results.log2_fold_changes[i].is_finite() && results.base_means[i].is_finite())
        .map(|i| MaPoint {
            peak: results.peaks[i].clone(),
            base_mean: results.base_means[i],
            log2_fold_change: results.log2_fold_changes[i],
            significant: results.is_significant(i, alpha),
        })
        .collect()
}

/// Row-centred values of the significant peaks
#[derive(Debug, Clone)]
pub struct Heatmap {
    pub peaks: Vec<Peak>,
    pub sample_ids: Vec<String>,
    /// peaks x samples, each row minus its mean
    pub values: Array2<f64>,
}

impl Heatmap {
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Heatmap of peaks with padj < alpha, rows in count-matrix order.
///
/// `matrix` is usually the normalized or variance stabilized counts and
/// must hold the same peaks as `results`.
pub fn significant_heatmap(
    results: &DifferentialResults,
    matrix: &NormalizedCountMatrix,
    alpha: f64,
) -> Result<Heatmap> {
    if matrix.peaks() != results.peaks.as_slice() {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} peaks matching the results", results.n_peaks()),
            got: format!("{} peaks", matrix.n_peaks()),
        });
    }
    let rows: Vec<usize> = (0..results.n_peaks())
        .filter(|&i| results.is_significant(i, alpha))
        .collect();

    let mut values = matrix.values().select(Axis(0), &rows);
    for mut row in values.axis_iter_mut(Axis(0)) {
        let m = row.mean().unwrap_or(0.0);
        row.mapv_inplace(|x| x - m);
    }
    log::debug!("Heatmap of {} significant peaks", rows.len());

    Ok(Heatmap {
        peaks: rows.iter().map(|&i| results.peaks[i].clone()).collect(),
        sample_ids: matrix.sample_ids().to_vec(),
        values,
    })
}
