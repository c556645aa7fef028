//! Count matrix representation for ATAC-Seq peak counts

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::Peak;
use crate::error::{AtacError, Result};

/// Raw read counts, rows are peaks and columns are samples.
///
/// Counts are stored as `f64` for the downstream numerics but are validated
/// to be non-negative integers at construction.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (peaks x samples)
    counts: Array2<f64>,
    /// Peak intervals, one per row
    peaks: Vec<Peak>,
    /// Sample identifiers, one per column
    sample_ids: Vec<String>,
    /// Row lookup keyed by interval
    peak_lookup: HashMap<Peak, usize>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, peaks: Vec<Peak>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_peaks, n_samples) = counts.dim();

        if peaks.len() != n_peaks {
            return Err(AtacError::DimensionMismatch {
                expected: format!("{} peaks", n_peaks),
                got: format!("{} peaks", peaks.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(AtacError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if let Some(&bad) = counts
            .iter()
            .find(|&&x| x < 0.0 || !x.is_finite() || x != x.round())
        {
            return Err(AtacError::format(format!(
                "counts must be non-negative integers, found {}",
                bad
            )));
        }

        let mut seen = HashSet::with_capacity(n_samples);
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(AtacError::format(format!("duplicate sample column '{}'", id)));
            }
        }

        let mut peak_lookup = HashMap::with_capacity(n_peaks);
        for (i, peak) in peaks.iter().enumerate() {
            if peak_lookup.insert(peak.clone(), i).is_some() {
                return Err(AtacError::format(format!("duplicate peak {}", peak)));
            }
        }

        Ok(Self {
            counts,
            peaks,
            sample_ids,
            peak_lookup,
        })
    }

    pub fn n_peaks(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for one peak across samples
    pub fn peak_counts(&self, peak_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(peak_idx)
    }

    /// Counts for one sample across peaks
    pub fn sample_counts(&self, sample_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.column(sample_idx)
    }

    pub fn peak_index(&self, peak: &Peak) -> Option<usize> {
        self.peak_lookup.get(peak).copied()
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Maximum count per peak across samples
    pub fn row_maxima(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.iter().copied().fold(0.0, f64::max))
            .collect()
    }

    /// Subset to specific peaks, keeping the given order
    pub fn subset_peaks(&self, peak_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), peak_indices);
        let new_peaks = peak_indices.iter().map(|&i| self.peaks[i].clone()).collect();
        Self::new(new_counts, new_peaks, self.sample_ids.clone())
    }
}
