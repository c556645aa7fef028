//! Differential accessibility results

use serde::Serialize;

use crate::data::Peak;
use crate::testing::Contrast;

/// One row per retained peak, in count-matrix order. Peaks that could not be
/// tested carry NaN in the test columns.
#[derive(Debug, Clone, Serialize)]
pub struct DifferentialResults {
    pub peaks: Vec<Peak>,
    /// Mean of normalized counts across all samples
    pub base_means: Vec<f64>,
    /// log2(level_a / level_b)
    pub log2_fold_changes: Vec<f64>,
    /// Standard error of the log2 fold change
    pub lfc_se: Vec<f64>,
    /// Threshold Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values
    pub padj: Vec<f64>,
    /// Dispersion used in the test
    pub dispersions: Vec<f64>,
    pub gene_wise_dispersions: Vec<f64>,
    pub trended_dispersions: Vec<f64>,
    pub contrast: Contrast,
}

impl DifferentialResults {
    /// All-NaN results for the given peaks
    pub fn new(peaks: Vec<Peak>, contrast: Contrast) -> Self {
        let n = peaks.len();
        Self {
            peaks,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            gene_wise_dispersions: vec![f64::NAN; n],
            trended_dispersions: vec![f64::NAN; n],
            contrast,
        }
    }

    pub fn n_peaks(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_significant(&self, idx: usize, alpha: f64) -> bool {
        let p = self.padj[idx];
        p.is_finite() && p < alpha
    }

    /// Peaks with padj < alpha
    pub fn significant_peaks(&self, alpha: f64) -> Vec<&Peak> {
        (0..self.n_peaks())
            .filter(|&i| self.is_significant(i, alpha))
            .map(|i| &self.peaks[i])
            .collect()
    }

    /// Significant peaks more accessible in `level_a`
    pub fn opened_peaks(&self, alpha: f64) -> Vec<&Peak> {
        (0..self.n_peaks())
            .filter(|&i| self.is_significant(i, alpha) && self.log2_fold_changes[i] > 0.0)
            .map(|i| &self.peaks[i])
            .collect()
    }

    /// Significant peaks more accessible in `level_b`
    pub fn closed_peaks(&self, alpha: f64) -> Vec<&Peak> {
        (0..self.n_peaks())
            .filter(|&i| self.is_significant(i, alpha) && self.log2_fold_changes[i] < 0.0)
            .map(|i| &self.peaks[i])
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        ResultsSummary {
            total_peaks: self.n_peaks(),
            peaks_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: self.significant_peaks(alpha).len(),
            opened: self.opened_peaks(alpha).len(),
            closed: self.closed_peaks(alpha).len(),
            alpha,
            lfc_threshold: self.contrast.lfc_threshold,
        }
    }
}

/// Counts of tested and significant peaks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsSummary {
    pub total_peaks: usize,
    pub peaks_tested: usize,
    pub significant: usize,
    pub opened: usize,
    pub closed: usize,
    pub alpha: f64,
    pub lfc_threshold: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Differential accessibility summary")?;
        writeln!(f, "==================================")?;
        writeln!(f, "Total peaks: {}", self.total_peaks)?;
        writeln!(f, "Peaks tested: {}", self.peaks_tested)?;
        writeln!(
            f,
            "Significant (padj < {}, |log2FC| > {}): {}",
            self.alpha, self.lfc_threshold, self.significant
        )?;
        writeln!(f, "  Higher in first group: {}", self.opened)?;
        writeln!(f, "  Higher in second group: {}", self.closed)?;
        Ok(())
    }
}
