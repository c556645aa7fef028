//! Data structures for peak count analysis

mod count_matrix;
mod dataset;
mod metadata;
mod peak;

pub use count_matrix::CountMatrix;
pub use dataset::PeakDataSet;
pub use metadata::{GroupingFactor, SampleMetadata, SampleRecord};
pub use peak::Peak;
