//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::PeakDataSet;
use crate::error::{AtacError, Result};
use crate::stats;

/// Scale of the anchored pseudo-reference (counts per million)
const REFERENCE_SCALE: f64 = 1e6;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFactorMethod {
    /// Median of ratios against a library-size-normalized pseudo-reference.
    /// Each factor depends on its own sample's depth only, so rescaling one
    /// sample rescales exactly its factor.
    #[default]
    AnchoredRatio,
    /// Standard median of ratios against the per-peak geometric mean,
    /// recentred to a geometric mean of 1
    Ratio,
}

/// One positive scaling factor per sample
#[derive(Debug, Clone)]
pub struct SizeFactors {
    sample_ids: Vec<String>,
    factors: Array1<f64>,
    method: SizeFactorMethod,
}

impl SizeFactors {
    pub fn new(sample_ids: Vec<String>, factors: Array1<f64>, method: SizeFactorMethod) -> Result<Self> {
        if sample_ids.len() != factors.len() {
            return Err(AtacError::DimensionMismatch {
                expected: format!("{} size factors", sample_ids.len()),
                got: format!("{} size factors", factors.len()),
            });
        }
        if factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
            return Err(AtacError::insufficient("size factors must be positive and finite"));
        }
        Ok(Self {
            sample_ids,
            factors,
            method,
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.factors
    }

    pub fn as_slice(&self) -> &[f64] {
        self.factors.as_slice().unwrap_or(&[])
    }

    pub fn get(&self, sample_idx: usize) -> f64 {
        self.factors[sample_idx]
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn method(&self) -> SizeFactorMethod {
        self.method
    }
}

/// Estimate one size factor per sample of the dataset
pub fn estimate_size_factors(dataset: &PeakDataSet, method: SizeFactorMethod) -> Result<SizeFactors> {
    let counts = dataset.counts();
    let meta_ids = dataset.metadata().sample_ids();
    if counts.sample_ids().iter().map(|s| s.as_str()).ne(meta_ids.iter().copied()) {
        return Err(AtacError::format("count columns and metadata rows are not aligned"));
    }

    let factors = match method {
        SizeFactorMethod::AnchoredRatio => size_factors_anchored(counts.counts())?,
        SizeFactorMethod::Ratio => size_factors_ratio(counts.counts())?,
    };

    log::info!(
        "Size factors ({:?}): {}",
        method,
        counts
            .sample_ids()
            .iter()
            .zip(factors.iter())
            .map(|(id, sf)| format!("{}={:.4}", id, sf))
            .collect::<Vec<_>>()
            .join(", ")
    );

    SizeFactors::new(counts.sample_ids().to_vec(), factors, method)
}

/// Indices of peaks with a nonzero count in every sample
fn peaks_nonzero_everywhere(counts: ArrayView2<f64>) -> Vec<usize> {
    counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, _)| i)
        .collect()
}

fn check_shape(counts: ArrayView2<f64>) -> Result<Vec<usize>> {
    let (n_peaks, n_samples) = counts.dim();
    if n_samples < 2 {
        return Err(AtacError::insufficient(format!(
            "at least two samples are required for normalization, found {}",
            n_samples
        )));
    }
    if n_peaks == 0 {
        return Err(AtacError::insufficient("count matrix has no peaks"));
    }
    let usable = peaks_nonzero_everywhere(counts);
    if usable.is_empty() {
        return Err(AtacError::insufficient("no peak has nonzero counts in every sample"));
    }
    Ok(usable)
}

/// Median over usable peaks of count / reference for one sample
fn median_ratio(counts: ArrayView2<f64>, usable: &[usize], reference: &[f64], sample: usize) -> f64 {
    let ratios: Vec<f64> = usable
        .iter()
        .zip(reference.iter())
        .map(|(&i, &r)| counts[[i, sample]] / r)
        .collect();
    stats::median(&ratios)
}

/// Median of ratios against a pseudo-reference built from library-size
/// normalized counts: ref_i = geomean_k(1e6 * x_ik / L_k).
fn size_factors_anchored(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let usable = check_shape(counts)?;
    let n_samples = counts.ncols();

    let library_sizes: Vec<f64> = counts.axis_iter(Axis(1)).map(|col| col.sum()).collect();

    let reference: Vec<f64> = usable
        .iter()
        .map(|&i| {
            let scaled: Vec<f64> = (0..n_samples)
                .map(|j| REFERENCE_SCALE * counts[[i, j]] / library_sizes[j])
                .collect();
            stats::geometric_mean(&scaled)
        })
        .collect();

    let factors: Array1<f64> = (0..n_samples)
        .map(|j| median_ratio(counts, &usable, &reference, j))
        .collect();

    Ok(factors)
}

/// Standard median of ratios method
fn size_factors_ratio(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let usable = check_shape(counts)?;
    let n_samples = counts.ncols();

    let reference: Vec<f64> = usable
        .iter()
        .map(|&i| stats::geometric_mean(&counts.row(i).to_vec()))
        .collect();

    let mut factors: Array1<f64> = (0..n_samples)
        .map(|j| median_ratio(counts, &usable, &reference, j))
        .collect();

    let center = stats::geometric_mean(factors.as_slice().unwrap_or(&[]));
    if center.is_finite() && center > 0.0 {
        factors.mapv_inplace(|x| x / center);
    }

    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, Peak, SampleMetadata, SampleRecord};
    use ndarray::{array, Array2};

    fn dataset(counts: Array2<f64>) -> PeakDataSet {
        let n_peaks = counts.nrows();
        let n_samples = counts.ncols();
        let peaks = (0..n_peaks)
            .map(|i| Peak::new("chr1", (i as u64) * 500, (i as u64) * 500 + 200).unwrap())
            .collect();
        let ids: Vec<String> = (0..n_samples).map(|j| format!("s{}", j + 1)).collect();
        let records = ids
            .iter()
            .enumerate()
            .map(|(j, id)| SampleRecord::new(id.clone(), if j % 2 == 0 { "A" } else { "B" }, "d1"))
            .collect();
        let matrix = CountMatrix::new(counts, peaks, ids).unwrap();
        PeakDataSet::align(matrix, &SampleMetadata::new(records).unwrap()).unwrap()
    }

    fn base_counts() -> Array2<f64> {
        array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0],
            [0.0, 3.0, 7.0, 1.0]
        ]
    }

    #[test]
    fn test_depth_reflected_in_factors() {
        for method in [SizeFactorMethod::AnchoredRatio, SizeFactorMethod::Ratio] {
            let sf = estimate_size_factors(&dataset(base_counts()), method).unwrap();
            assert_eq!(sf.len(), 4);
            assert!(sf.values().iter().all(|&x| x > 0.0));
            // s2 has 2x the depth of s1, s4 has 2x the depth of s3
            assert!((sf.get(1) / sf.get(0) - 2.0).abs() < 1e-9);
            assert!((sf.get(3) / sf.get(2) - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scaling_one_sample_scales_its_factor_exactly() {
        let base = estimate_size_factors(&dataset(base_counts()), SizeFactorMethod::AnchoredRatio).unwrap();

        let c = 3.0;
        let mut scaled = base_counts();
        scaled.column_mut(2).mapv_inplace(|x| x * c);
        let rescaled = estimate_size_factors(&dataset(scaled), SizeFactorMethod::AnchoredRatio).unwrap();

        for j in 0..4 {
            let expected = if j == 2 { base.get(j) * c } else { base.get(j) };
            assert!(
                (rescaled.get(j) - expected).abs() <= 1e-9 * expected,
                "sample {}: {} vs {}",
                j,
                rescaled.get(j),
                expected
            );
        }
    }

    #[test]
    fn test_uniform_rescaling_scales_all_factors() {
        let base = estimate_size_factors(&dataset(base_counts()), SizeFactorMethod::AnchoredRatio).unwrap();
        let rescaled =
            estimate_size_factors(&dataset(base_counts().mapv(|x| x * 5.0)), SizeFactorMethod::AnchoredRatio).unwrap();
        for j in 0..4 {
            assert!((rescaled.get(j) / base.get(j) - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ratio_method_is_centered() {
        let sf = estimate_size_factors(&dataset(base_counts()), SizeFactorMethod::Ratio).unwrap();
        let geo = stats::geometric_mean(sf.as_slice());
        assert!((geo - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_rejects_bad_factors() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let short = SizeFactors::new(ids.clone(), array![1.0], SizeFactorMethod::Ratio);
        assert!(matches!(short, Err(AtacError::DimensionMismatch { .. })));
        let zero = SizeFactors::new(ids.clone(), array![1.0, 0.0], SizeFactorMethod::Ratio);
        assert!(matches!(zero, Err(AtacError::InsufficientData { .. })));
        let nan = SizeFactors::new(ids, array![f64::NAN, 1.0], SizeFactorMethod::Ratio);
        assert!(nan.is_err());
    }

    #[test]
    fn test_estimated_factors_written_as_table() {
        let sf = estimate_size_factors(&dataset(base_counts()), SizeFactorMethod::AnchoredRatio).unwrap();
        assert_eq!(sf.method(), SizeFactorMethod::AnchoredRatio);
        assert_eq!(sf.sample_ids(), &["s1", "s2", "s3", "s4"]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("size_factors.tsv");
        crate::io::write_size_factors(&path, &sf).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "sample\tsize_factor");
        for (j, line) in lines[1..].iter().enumerate() {
            let (id, value) = line.split_once('\t').unwrap();
            assert_eq!(id, sf.sample_ids()[j]);
            assert!((value.parse::<f64>().unwrap() - sf.get(j)).abs() <= 1e-12 * sf.get(j));
        }
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let result = estimate_size_factors(&dataset(array![[10.0], [20.0]]), SizeFactorMethod::AnchoredRatio);
        assert!(matches!(result, Err(AtacError::InsufficientData { .. })));
    }

    #[test]
    fn test_no_peak_nonzero_everywhere_is_insufficient() {
        let counts = array![[0.0, 10.0, 5.0], [7.0, 0.0, 3.0], [4.0, 2.0, 0.0]];
        let result = estimate_size_factors(&dataset(counts), SizeFactorMethod::Ratio);
        assert!(matches!(result, Err(AtacError::InsufficientData { .. })));
    }
}
