//! Library-size normalization of peak counts

mod normalized;
mod size_factors;

pub use normalized::{normalize, NormalizedCountMatrix};
pub use size_factors::{estimate_size_factors, SizeFactorMethod, SizeFactors};
