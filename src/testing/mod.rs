//! Differential accessibility testing

mod contrast;
mod fdr;
mod pvalue;
mod wald;

pub use contrast::Contrast;
pub use fdr::benjamini_hochberg;
pub use pvalue::{calculate_pvalue, threshold_wald_statistic};
pub use wald::{differential_peaks, DifferentialOutput, DifferentialParams};
