//! Reading input tables and writing result tables

mod results;
mod tables;
mod writers;

pub use results::{DifferentialResults, ResultsSummary};
pub use tables::{parse_count_table, parse_metadata_table, read_count_table, read_metadata_table};
pub use writers::{
    write_heatmap, write_ma_points, write_mean_sd, write_normalized_counts, write_pathways, write_pca_loadings,
    write_pca_scores, write_pca_variance, write_peak_annotation, write_results, write_run_config,
    write_sample_summaries, write_size_factors,
};
