//! Negative binomial GLM for peak counts

mod design;
mod fitting;
mod negative_binomial;

pub use design::{check_full_rank, DesignMatrix, DesignSpec};
pub(crate) use fitting::{crossprod_weighted, least_squares, log_determinant};
pub use fitting::{fit_peaks, fit_single_peak, GlmFitParams, PeakFit};
pub use negative_binomial::{nb_log_density, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
