//! Count transformations for visualization
//!
//! Variance stabilized values feed PCA and heatmaps when requested.

mod vst;

pub use vst::{blind_vst, vst, VstResult};
