//! Size-factor normalized counts

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::SizeFactors;
use crate::data::{CountMatrix, Peak};
use crate::error::{AtacError, Result};

/// Counts divided column-wise by their sample's size factor.
///
/// Same shape, peak order and sample order as the raw matrix it came from.
#[derive(Debug, Clone)]
pub struct NormalizedCountMatrix {
    values: Array2<f64>,
    peaks: Vec<Peak>,
    sample_ids: Vec<String>,
}

impl NormalizedCountMatrix {
    pub fn n_peaks(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn peak_values(&self, peak_idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(peak_idx)
    }

    /// Mean normalized count per peak
    pub fn base_means(&self) -> Vec<f64> {
        self.values
            .axis_iter(Axis(0))
            .map(|row| row.mean().unwrap_or(f64::NAN))
            .collect()
    }

    /// Apply `f` elementwise, keeping peak and sample labels
    pub fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            values: self.values.mapv(f),
            peaks: self.peaks.clone(),
            sample_ids: self.sample_ids.clone(),
        }
    }
}

/// Divide each count by its sample's size factor
pub fn normalize(counts: &CountMatrix, size_factors: &SizeFactors) -> Result<NormalizedCountMatrix> {
    if counts.n_samples() != size_factors.len() {
        return Err(AtacError::DimensionMismatch {
            expected: format!("{} size factors", counts.n_samples()),
            got: format!("{} size factors", size_factors.len()),
        });
    }
    if counts.sample_ids() != size_factors.sample_ids() {
        return Err(AtacError::format(
            "size factors were estimated for a different sample order",
        ));
    }

    let mut values = counts.counts().to_owned();
    for (mut col, &sf) in values.axis_iter_mut(Axis(1)).zip(size_factors.values().iter()) {
        col.mapv_inplace(|x| x / sf);
    }

    log::debug!(
        "Normalized {} peaks x {} samples",
        counts.n_peaks(),
        counts.n_samples()
    );

    Ok(NormalizedCountMatrix {
        values,
        peaks: counts.peaks().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PeakDataSet, SampleMetadata, SampleRecord};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::array;

    fn counts(values: Array2<f64>) -> CountMatrix {
        let peaks = (0..values.nrows())
            .map(|i| Peak::new("chr3", (i as u64) * 100, (i as u64) * 100 + 50).unwrap())
            .collect();
        let ids = (0..values.ncols()).map(|j| format!("s{}", j)).collect();
        CountMatrix::new(values, peaks, ids).unwrap()
    }

    fn normalized(values: Array2<f64>) -> NormalizedCountMatrix {
        let matrix = counts(values);
        let records = matrix
            .sample_ids()
            .iter()
            .map(|id| SampleRecord::new(id.clone(), "T", "D"))
            .collect();
        let dataset = PeakDataSet::align(matrix.clone(), &SampleMetadata::new(records).unwrap()).unwrap();
        let sf = estimate_size_factors(&dataset, SizeFactorMethod::AnchoredRatio).unwrap();
        normalize(&matrix, &sf).unwrap()
    }

    #[test]
    fn test_divides_by_size_factor() {
        let matrix = counts(array![[10.0, 40.0], [20.0, 80.0]]);
        let sf = SizeFactors::new(
            matrix.sample_ids().to_vec(),
            array![0.5, 2.0],
            SizeFactorMethod::AnchoredRatio,
        )
        .unwrap();
        let norm = normalize(&matrix, &sf).unwrap();
        assert_eq!(norm.values(), array![[20.0, 20.0], [40.0, 40.0]]);
        assert_eq!(norm.base_means(), vec![20.0, 40.0]);
    }

    #[test]
    fn test_normalized_counts_invariant_to_sample_scaling() {
        let base = array![[10.0, 30.0, 12.0], [50.0, 40.0, 70.0], [5.0, 9.0, 4.0], [100.0, 80.0, 90.0]];
        let mut scaled = base.clone();
        scaled.column_mut(1).mapv_inplace(|x| x * 2.0);

        let a = normalized(base.clone());
        let b = normalized(scaled);
        let c = normalized(base.mapv(|x| x * 7.0));
        for (x, y) in a.values().iter().zip(b.values().iter()) {
            assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0));
        }
        for (x, y) in a.values().iter().zip(c.values().iter()) {
            assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0));
        }
    }

    #[test]
    fn test_mismatched_samples_rejected() {
        let matrix = counts(array![[1.0, 2.0, 3.0]]);
        let sf = SizeFactors::new(vec!["s0".into(), "s1".into()], array![1.0, 1.0], SizeFactorMethod::Ratio).unwrap();
        assert!(matches!(normalize(&matrix, &sf), Err(AtacError::DimensionMismatch { .. })));
    }
}
