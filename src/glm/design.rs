//! Design matrix construction for the per-peak count model

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{GroupingFactor, SampleMetadata};
use crate::error::{AtacError, Result};

/// Which metadata columns enter the model.
///
/// The grouping factor is coded with one indicator per level (cell means),
/// so a contrast between two levels is a difference of two coefficients.
/// The optional covariate is treatment coded against its first level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignSpec {
    pub factor: GroupingFactor,
    pub covariate: Option<GroupingFactor>,
}

impl DesignSpec {
    pub fn new(factor: GroupingFactor) -> Self {
        Self { factor, covariate: None }
    }

    /// Adjust for a second factor, e.g. donor when comparing cell types
    pub fn adjusted_for(factor: GroupingFactor, covariate: GroupingFactor) -> Result<Self> {
        if factor == covariate {
            return Err(AtacError::InvalidInput {
                reason: format!("cannot adjust '{}' for itself", factor),
            });
        }
        Ok(Self {
            factor,
            covariate: Some(covariate),
        })
    }
}

/// Model matrix (samples x coefficients) with its column bookkeeping
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    coef_names: Vec<String>,
    /// Levels of the grouping factor, column `k` is the indicator of level `k`
    levels: Vec<String>,
}

impl DesignMatrix {
    /// Build and rank-check the model matrix for aligned metadata
    pub fn build(spec: &DesignSpec, metadata: &SampleMetadata) -> Result<Self> {
        let n_samples = metadata.n_samples();
        let levels = metadata.levels(spec.factor);
        let factor_values = metadata.values(spec.factor);

        let covariate_levels: Vec<String> = match spec.covariate {
            Some(cov) => metadata.levels(cov).into_iter().skip(1).collect(),
            None => Vec::new(),
        };

        let n_coef = levels.len() + covariate_levels.len();
        let mut matrix = Array2::zeros((n_samples, n_coef));
        let mut coef_names = Vec::with_capacity(n_coef);

        for (k, level) in levels.iter().enumerate() {
            coef_names.push(format!("{}_{}", spec.factor, level));
            for (j, value) in factor_values.iter().enumerate() {
                if *value == level.as_str() {
                    matrix[[j, k]] = 1.0;
                }
            }
        }

        if let Some(cov) = spec.covariate {
            let cov_values = metadata.values(cov);
            for (offset, level) in covariate_levels.iter().enumerate() {
                let k = levels.len() + offset;
                coef_names.push(format!("{}_{}", cov, level));
                for (j, value) in cov_values.iter().enumerate() {
                    if *value == level.as_str() {
                        matrix[[j, k]] = 1.0;
                    }
                }
            }
        }

        check_full_rank(&matrix)?;
        if n_samples <= n_coef {
            return Err(AtacError::insufficient(format!(
                "{} samples leave no residual degrees of freedom for {} coefficients",
                n_samples, n_coef
            )));
        }

        log::debug!("Design matrix {}x{}: {:?}", n_samples, n_coef, coef_names);

        Ok(Self {
            matrix,
            coef_names,
            levels,
        })
    }

    /// Single column of ones; used for blind dispersion fits
    pub fn intercept(n_samples: usize) -> Self {
        Self {
            matrix: Array2::ones((n_samples, 1)),
            coef_names: vec!["intercept".to_string()],
            levels: Vec::new(),
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coef(&self) -> usize {
        self.matrix.ncols()
    }

    /// Contrast vector for `level_a - level_b` of the grouping factor
    pub fn contrast_vector(&self, level_a: &str, level_b: &str) -> Result<Array1<f64>> {
        let index = |level: &str| {
            self.levels
                .iter()
                .position(|l| l == level)
                .ok_or_else(|| AtacError::contrast(format!("level '{}' is not in the design", level)))
        };
        let (a, b) = (index(level_a)?, index(level_b)?);
        if a == b {
            return Err(AtacError::contrast("contrast levels must differ"));
        }
        let mut c = Array1::zeros(self.n_coef());
        c[a] = 1.0;
        c[b] = -1.0;
        Ok(c)
    }
}

/// Check if a design matrix is full column rank.
///
/// Uses Householder QR with column pivoting; the rank counts diagonal
/// elements of R above `max(nrow, ncol) * eps * max(|diag(R)|)`, as R's
/// `qr()` does.
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();

    if nrow == 0 || ncol == 0 {
        return Err(AtacError::insufficient("design matrix has zero rows or columns"));
    }

    let rank = qr_rank(matrix);

    if rank < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));

        if has_zero_column {
            return Err(AtacError::insufficient(
                "the model matrix is not full rank: a level has no samples, \
                 leaving a column of zeros",
            ));
        }
        return Err(AtacError::insufficient(
            "the model matrix is not full rank: the covariate is confounded \
             with the grouping factor",
        ));
    }

    Ok(())
}

/// Numerical rank via Householder QR with column pivoting
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();
    let k = nrow.min(ncol);

    let mut r = matrix.to_owned();

    let mut col_norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        // pivot on the largest remaining column norm
        let mut best_col = step;
        let mut best_norm = col_norms_sq[step];
        for j in (step + 1)..ncol {
            if col_norms_sq[j] > best_norm {
                best_norm = col_norms_sq[j];
                best_col = j;
            }
        }

        if best_col != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best_col]);
            }
            col_norms_sq.swap(step, best_col);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]] * r[[i, step]]).sum::<f64>().sqrt();

        if alpha < f64::EPSILON * 1e3 {
            break;
        }

        // sign chosen to avoid cancellation
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;

        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, step]]).sum::<f64>();
        if v_norm_sq.abs() < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let mut dot = v0 * r[[step, j]];
            for i in (step + 1)..nrow {
                dot += r[[i, step]] * r[[i, j]];
            }
            let scale = tau * dot;

            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
        }

        for j in (step + 1)..ncol {
            col_norms_sq[j] = (col_norms_sq[j] - r[[step, j]] * r[[step, j]]).max(0.0);
        }
    }

    let max_dim = nrow.max(ncol) as f64;
    let max_abs_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = max_dim * f64::EPSILON * max_abs_diag;

    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
