//! Exploratory statistics and PCA of peak counts

mod descriptive;
mod pca;

pub use descriptive::{
    log_transform, mean, outlier_fractions, quantile, quantiles, row_mean_sd_summary, standard_deviation,
    summarize_samples, OutlierFractions, RowSummary, SampleSummary,
};
pub use pca::{principal_components, PcaResult};
