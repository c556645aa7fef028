//! Principal component analysis of normalized counts
//!
//! Samples are observations and peaks are variables. Peaks are centred but
//! not scaled (prcomp defaults). With far more peaks than samples the
//! decomposition runs on the n x n sample Gram matrix instead of the
//! p x p covariance.

use ndarray::{Array1, Array2, Axis};

use crate::data::Peak;
use crate::error::{AtacError, Result};
use crate::normalization::NormalizedCountMatrix;

/// Eigenvalues below this fraction of the largest are treated as zero
const EIGEN_TOLERANCE: f64 = 1e-10;
const MAX_SWEEPS: usize = 100;

#[derive(Debug, Clone)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    pub peaks: Vec<Peak>,
    /// Sample coordinates (samples x components)
    pub scores: Array2<f64>,
    /// Variance of each component (n - 1 denominator)
    pub variance: Vec<f64>,
    /// Fraction of the total variance per component
    pub proportion: Vec<f64>,
    /// `round(100 * proportion)`
    pub percent_variance: Vec<f64>,
    /// Signed unit-length peak weights (peaks x components)
    pub rotation: Array2<f64>,
    /// `|rotation|` normalized to sum to 1 within each component
    pub loadings: Array2<f64>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.variance.len()
    }

    /// Peak indices ordered by decreasing loading on a 0-based component
    pub fn peaks_by_loading(&self, component: usize) -> Vec<usize> {
        let column = self.loadings.column(component);
        let mut order: Vec<usize> = (0..self.peaks.len()).collect();
        order.sort_by(|&a, &b| column[b].total_cmp(&column[a]).then(a.cmp(&b)));
        order
    }
}

/// PCA of the samples x peaks matrix of normalized counts.
///
/// Keeps every component with a non-zero eigenvalue (at most n - 1), or the
/// first `n_components` of them.
pub fn principal_components(normalized: &NormalizedCountMatrix, n_components: Option<usize>) -> Result<PcaResult> {
    let (n_peaks, n_samples) = (normalized.n_peaks(), normalized.n_samples());
    if n_samples < 2 {
        return Err(AtacError::insufficient(format!(
            "PCA needs at least 2 samples, got {}",
            n_samples
        )));
    }
    if n_peaks == 0 {
        return Err(AtacError::insufficient("PCA needs at least one peak"));
    }

    // peaks x samples, each peak centred over samples
    let mut centered = normalized.values().to_owned();
    for mut row in centered.axis_iter_mut(Axis(0)) {
        let m = row.mean().unwrap_or(0.0);
        row.mapv_inplace(|x| x - m);
    }

    let gram = centered.t().dot(&centered);
    let (eigenvalues, eigenvectors) = symmetric_eigen(gram);

    let largest = eigenvalues.first().copied().unwrap_or(0.0);
    if !(largest > 0.0) {
        return Err(AtacError::insufficient("normalized counts have zero total variance"));
    }
    let positive: Vec<usize> = (0..eigenvalues.len())
        .filter(|&k| eigenvalues[k] > largest * EIGEN_TOLERANCE)
        .collect();
    let total: f64 = positive.iter().map(|&k| eigenvalues[k]).sum();
    let keep = n_components.map_or(positive.len(), |n| n.min(positive.len()));

    let denom = (n_samples - 1) as f64;
    let mut scores = Array2::zeros((n_samples, keep));
    let mut rotation = Array2::zeros((n_peaks, keep));
    let mut loadings = Array2::zeros((n_peaks, keep));
    let mut variance = Vec::with_capacity(keep);
    let mut proportion = Vec::with_capacity(keep);

    for (c, &k) in positive.iter().take(keep).enumerate() {
        let lambda = eigenvalues[k];
        let sv = lambda.sqrt();
        let v = eigenvectors.column(k);

        let mut weights: Array1<f64> = centered.dot(&v) / sv;
        let mut coords: Array1<f64> = v.mapv(|x| x * sv);

        // fix the sign so the heaviest peak weight is positive
        let pivot = weights
            .iter()
            .copied()
            .fold(0.0f64, |acc, w| if w.abs() > acc.abs() { w } else { acc });
        if pivot < 0.0 {
            weights.mapv_inplace(|w| -w);
            coords.mapv_inplace(|x| -x);
        }

        let abs_sum: f64 = weights.iter().map(|w| w.abs()).sum();
        scores.column_mut(c).assign(&coords);
        loadings.column_mut(c).assign(&weights.mapv(|w| w.abs() / abs_sum));
        rotation.column_mut(c).assign(&weights);

        variance.push(lambda / denom);
        proportion.push(lambda / total);
    }

    let percent_variance: Vec<f64> = proportion.iter().map(|p| (100.0 * p).round()).collect();

    log::info!(
        "PCA: {} component(s), percent variance {:?}",
        keep,
        percent_variance
    );

    Ok(PcaResult {
        sample_ids: normalized.sample_ids().to_vec(),
        peaks: normalized.peaks().to_vec(),
        scores,
        variance,
        proportion,
        percent_variance,
        rotation,
        loadings,
    })
}

/// Cyclic Jacobi eigendecomposition of a real symmetric matrix.
///
/// Returns eigenvalues in decreasing order and the matching unit
/// eigenvectors as columns.
fn symmetric_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]] * a[[i, j]])
            .sum();
        if off <= 1e-24 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                a[[p, q]] = 0.0;
                a[[q, p]] = 0.0;

                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));
    let values = order.iter().map(|&i| a[[i, i]]).collect();
    let vectors = v.select(Axis(1), &order);
    (values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use crate::normalization::{normalize, SizeFactorMethod, SizeFactors};
    use ndarray::array;

    fn unit_normalized(values: Array2<f64>) -> NormalizedCountMatrix {
        let peaks = (0..values.nrows())
            .map(|i| Peak::new("chr1", (i as u64) * 1000, (i as u64) * 1000 + 100).unwrap())
            .collect();
        let ids: Vec<String> = (0..values.ncols()).map(|j| format!("s{}", j)).collect();
        let n = ids.len();
        let counts = CountMatrix::new(values, peaks, ids.clone()).unwrap();
        let sf = SizeFactors::new(ids, Array1::ones(n), SizeFactorMethod::Ratio).unwrap();
        normalize(&counts, &sf).unwrap()
    }

    fn two_group_matrix() -> NormalizedCountMatrix {
        unit_normalized(array![
            [100.0, 104.0, 10.0, 12.0],
            [50.0, 48.0, 52.0, 51.0],
            [20.0, 22.0, 80.0, 85.0],
            [300.0, 290.0, 310.0, 305.0],
            [7.0, 9.0, 8.0, 30.0]
        ])
    }

    #[test]
    fn test_symmetric_eigen_reconstructs() {
        let m = array![[4.0, 1.0, 2.0], [1.0, 3.0, 0.5], [2.0, 0.5, 5.0]];
        let (values, vectors) = symmetric_eigen(m.clone());
        assert!(values.windows(2).all(|w| w[0] >= w[1]));
        let lambda = Array2::from_diag(&Array1::from(values));
        let rebuilt = vectors.dot(&lambda).dot(&vectors.t());
        for (x, y) in rebuilt.iter().zip(m.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
        let gram = vectors.t().dot(&vectors);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_percent_variance_sums_to_100() {
        let pca = principal_components(&two_group_matrix(), None).unwrap();
        assert!(pca.n_components() <= 3);
        let total: f64 = pca.proportion.iter().sum();
        assert!((total - 1.0).abs() < 1e-10);
        let percent: f64 = pca.percent_variance.iter().sum();
        // each component rounds by at most 0.5
        assert!((percent - 100.0).abs() <= 0.5 * pca.n_components() as f64);
    }

    #[test]
    fn test_loadings_sum_to_one() {
        let pca = principal_components(&two_group_matrix(), None).unwrap();
        for k in 0..pca.n_components() {
            let sum: f64 = pca.loadings.column(k).sum();
            assert!((sum - 1.0).abs() < 1e-10);
            assert!(pca.loadings.column(k).iter().all(|&l| l >= 0.0));
        }
    }

    #[test]
    fn test_scores_are_projections() {
        let normalized = two_group_matrix();
        let pca = principal_components(&normalized, Some(2)).unwrap();
        assert_eq!(pca.scores.dim(), (4, 2));

        let mut centered = normalized.values().to_owned();
        for mut row in centered.axis_iter_mut(Axis(0)) {
            let m = row.mean().unwrap();
            row.mapv_inplace(|x| x - m);
        }
        let projected = centered.t().dot(&pca.rotation);
        for (x, y) in projected.iter().zip(pca.scores.iter()) {
            assert!((x - y).abs() < 1e-8);
        }
    }

    #[test]
    fn test_first_component_separates_groups() {
        let pca = principal_components(&two_group_matrix(), None).unwrap();
        let pc1 = pca.scores.column(0);
        assert!(pc1[0] * pc1[2] < 0.0);
        assert!(pc1[1] * pc1[3] < 0.0);
        assert!(pca.percent_variance[0] > 80.0);
        assert_eq!(pca.peaks_by_loading(0)[0], 0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let constant = unit_normalized(array![[5.0, 5.0, 5.0], [2.0, 2.0, 2.0]]);
        assert!(matches!(
            principal_components(&constant, None),
            Err(AtacError::InsufficientData { .. })
        ));
        let single = unit_normalized(array![[5.0], [2.0]]);
        assert!(principal_components(&single, None).is_err());
    }
}
