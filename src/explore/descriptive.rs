//! Per-sample and per-peak descriptive statistics
//!
//! Diagnostics only: nothing here feeds the count model.

use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::data::{CountMatrix, Peak};
use crate::error::{AtacError, Result};
use crate::normalization::NormalizedCountMatrix;
use crate::stats;

fn non_empty(x: &[f64], what: &str) -> Result<()> {
    if x.is_empty() {
        return Err(AtacError::InvalidInput {
            reason: format!("{}: data must not be empty", what),
        });
    }
    Ok(())
}

/// Arithmetic mean
pub fn mean(x: &[f64]) -> Result<f64> {
    non_empty(x, "mean")?;
    Ok(stats::mean(x))
}

/// Unbiased standard deviation (n - 1); needs at least two values
pub fn standard_deviation(x: &[f64]) -> Result<f64> {
    if x.len() < 2 {
        return Err(AtacError::InvalidInput {
            reason: format!("standard deviation needs at least 2 values, got {}", x.len()),
        });
    }
    Ok(stats::standard_deviation(x))
}

/// Linear-interpolation quantile (R type 7)
pub fn quantile(x: &[f64], p: f64) -> Result<f64> {
    Ok(quantiles(x, &[p])?[0])
}

/// Several quantiles sharing one sort
pub fn quantiles(x: &[f64], probs: &[f64]) -> Result<Vec<f64>> {
    non_empty(x, "quantile")?;
    if let Some(bad) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(AtacError::InvalidInput {
            reason: format!("quantile probability must be in [0, 1], got {}", bad),
        });
    }
    let sorted = stats::sorted(x);
    Ok(probs.iter().map(|&p| stats::quantile_sorted(&sorted, p)).collect())
}

/// Fractions of values flagged by the two outlier diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutlierFractions {
    /// Fraction of values above `1.5 * Q3`
    pub above_upper_fence_rule: f64,
    /// Fraction of values above `3 * IQR`. This compares raw values with a
    /// multiple of the spread itself, not with the `Q3 + 3 * IQR` fence.
    pub above_three_iqr: f64,
    pub upper_fence: f64,
    pub three_iqr: f64,
}

/// Outlier fractions for one vector of values
pub fn outlier_fractions(x: &[f64]) -> Result<OutlierFractions> {
    let q = quantiles(x, &[0.25, 0.75])?;
    let (q1, q3) = (q[0], q[1]);
    let upper_fence = 1.5 * q3;
    let three_iqr = 3.0 * (q3 - q1);

    let n = x.len() as f64;
    let frac_above = |cut: f64| x.iter().filter(|&&v| v > cut).count() as f64 / n;

    Ok(OutlierFractions {
        above_upper_fence_rule: frac_above(upper_fence),
        above_three_iqr: frac_above(three_iqr),
        upper_fence,
        three_iqr,
    })
}

/// `ln(count + 1)` per cell, for display
pub fn log_transform(counts: &CountMatrix) -> Array2<f64> {
    counts.counts().mapv(f64::ln_1p)
}

/// Mean and SD of one peak across samples
#[derive(Debug, Clone, Serialize)]
pub struct RowSummary {
    pub peak: Peak,
    pub mean: f64,
    pub sd: f64,
}

/// Per-peak mean and SD of normalized counts (mean-variance relationship)
pub fn row_mean_sd_summary(normalized: &NormalizedCountMatrix) -> Vec<RowSummary> {
    normalized
        .values()
        .axis_iter(Axis(0))
        .zip(normalized.peaks())
        .map(|(row, peak)| {
            let values = row.to_vec();
            RowSummary {
                peak: peak.clone(),
                mean: stats::mean(&values),
                sd: stats::standard_deviation(&values),
            }
        })
        .collect()
}

/// Diagnostics for one sample's raw count vector
#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub sample: String,
    pub total: f64,
    pub mean: f64,
    pub sd: f64,
    /// `(probability, value)` pairs
    pub quantiles: Vec<(f64, f64)>,
    pub iqr: f64,
    pub outliers: OutlierFractions,
}

/// Summaries for every sample column
pub fn summarize_samples(counts: &CountMatrix, probs: &[f64]) -> Result<Vec<SampleSummary>> {
    if counts.n_peaks() < 2 {
        return Err(AtacError::insufficient(format!(
            "sample summaries need at least 2 peaks, got {}",
            counts.n_peaks()
        )));
    }

    counts
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(j, sample)| {
            let x = counts.sample_counts(j).to_vec();
            let q = quantiles(&x, probs)?;
            let quartiles = quantiles(&x, &[0.25, 0.75])?;
            Ok(SampleSummary {
                sample: sample.clone(),
                total: x.iter().sum(),
                mean: mean(&x)?,
                sd: standard_deviation(&x)?,
                quantiles: probs.iter().copied().zip(q).collect(),
                iqr: quartiles[1] - quartiles[0],
                outliers: outlier_fractions(&x)?,
            })
        })
        .collect()
}
