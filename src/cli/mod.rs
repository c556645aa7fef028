//! Command-line interface for rust_atacseq

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{AnalysisConfig, PcaInput};
use crate::error::Result;
use crate::io::{
    write_heatmap, write_ma_points, write_mean_sd, write_normalized_counts, write_pathways, write_pca_loadings,
    write_pca_scores, write_pca_variance, write_peak_annotation, write_results, write_run_config,
    write_sample_summaries, write_size_factors,
};
use crate::{AnnotationOutput, Exploration, PipelineOutput, PreparedData};

#[derive(Parser)]
#[command(name = "rust_atacseq")]
#[command(version)]
#[command(about = "Differential accessibility analysis of ATAC-Seq peak counts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Inputs shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Path to the peak count table
    #[arg(short, long,
        long_help = "Path to the peak count table.\n\
            Whitespace-delimited with a header row: chrom, start, end, then one\n\
            column of raw read counts per sample. Lines starting with '#' after\n\
            the header are ignored.")]
    pub counts: String,

    /// Path to the sample table
    #[arg(short, long,
        long_help = "Path to the sample table.\n\
            Whitespace-delimited, no header, exactly three columns per row:\n\
            sample cell_type donor")]
    pub metadata: String,

    /// Keep peaks whose max count exceeds this [default: 50]
    #[arg(long, value_name = "N")]
    pub min_count: Option<u32>,

    /// JSON analysis configuration
    #[arg(long, value_name = "FILE",
        long_help = "JSON analysis configuration.\n\
            Fields not present fall back to their defaults. Command-line flags\n\
            override the file. The effective configuration is written to\n\
            run_config.json in the output directory.")]
    pub config: Option<String>,

    /// Output directory [default: atacseq_results]
    #[arg(short, long, default_value = "atacseq_results")]
    pub output_dir: PathBuf,
}

impl InputArgs {
    /// Configuration file (or defaults) with the shared flag overrides applied
    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(min_count) = self.min_count {
            config.filter.min_count = min_count;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full analysis
    #[command(
        about = "Run the full analysis",
        long_about = "Run the full analysis\n\n\
            Filters low-signal peaks, normalizes library sizes, summarizes the\n\
            samples with PCA and calls differentially accessible peaks between\n\
            two levels of a grouping factor with a negative binomial model.\n\
            With --tss, top-loading and significant peaks are linked to their\n\
            nearest genes; with --gene-sets those genes are tested for pathway\n\
            over-representation.",
        after_long_help = "\
Examples:
  # Two cell types, |log2FC| > 1
  rust_atacseq run -c peaks.counts.tsv -m samples.tsv \\
    --level-a Bcell --level-b Tcell -o bcell_vs_tcell

  # Adjust for donor and annotate
  rust_atacseq run -c peaks.counts.tsv -m samples.tsv \\
    --level-a Bcell --level-b Tcell --adjust-for donor \\
    --tss tss.txt --gene-sets pathways.gmt"
    )]
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Grouping factor of the contrast [default: cell_type]
        #[arg(long, default_value = "cell_type",
            long_help = "Metadata factor holding the contrasted levels.\n\
                cell_type: second column of the sample table\n\
                donor:     third column of the sample table")]
        factor: String,

        /// Numerator level of the contrast
        #[arg(long)]
        level_a: String,

        /// Denominator level of the contrast
        #[arg(long)]
        level_b: String,

        /// |log2 fold change| threshold of the Wald test [default: 1]
        #[arg(long,
            long_help = "Log2 fold change threshold for testing H0: |LFC| <= threshold.\n\
                0 gives the ordinary Wald test of LFC = 0.")]
        lfc_threshold: Option<f64>,

        /// Significance level on adjusted p-values [default: 0.05]
        #[arg(short, long)]
        alpha: Option<f64>,

        /// Covariate factor to adjust for
        #[arg(long, value_name = "FACTOR",
            long_help = "Add the other metadata factor to the model, e.g. --adjust-for donor\n\
                when contrasting cell types. Requires replicates across it.")]
        adjust_for: Option<String>,

        /// TSS table for nearest-gene annotation
        #[arg(long, value_name = "FILE",
            long_help = "Transcription start sites, whitespace-delimited, no header:\n\
                chrom position strand gene_id")]
        tss: Option<String>,

        /// GMT gene sets for pathway enrichment (needs --tss)
        #[arg(long, value_name = "FILE", requires = "tss")]
        gene_sets: Option<String>,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// Filter and normalize counts only
    #[command(
        long_about = "Filter and normalize counts.\n\n\
            Writes the normalized counts of the peaks passing the max-count\n\
            filter and the per-sample size factors.",
        after_long_help = "\
Examples:
  rust_atacseq normalize -c peaks.counts.tsv -m samples.tsv -o normalized
  rust_atacseq normalize -c peaks.counts.tsv -m samples.tsv --min-count 20"
    )]
    Normalize {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Sample summaries and PCA
    #[command(
        long_about = "Exploratory analysis.\n\n\
            Writes per-sample count summaries, per-peak mean and SD of the\n\
            normalized counts, and PCA scores, variance and loadings.",
        after_long_help = "\
Examples:
  rust_atacseq explore -c peaks.counts.tsv -m samples.tsv -o qc
  rust_atacseq explore -c peaks.counts.tsv -m samples.tsv --vst"
    )]
    Explore {
        #[command(flatten)]
        input: InputArgs,

        /// Run PCA on variance stabilized counts
        #[arg(long,
            long_help = "Run PCA on variance stabilized counts instead of normalized counts.\n\
                The dispersion trend is fitted blind to the sample groups.")]
        vst: bool,
    },
}

/// Apply the `explore` flags to a configuration
pub fn apply_explore_flags(config: &mut AnalysisConfig, vst: bool) {
    if vst {
        config.explore.pca_input = PcaInput::Vst;
    }
}

/// Tables of the load-side stages
pub fn write_prepared(dir: &Path, prepared: &PreparedData) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_normalized_counts(dir.join("normalized_counts.tsv"), &prepared.normalized)?;
    write_size_factors(dir.join("size_factors.tsv"), &prepared.size_factors)?;
    Ok(())
}

pub fn write_exploration(dir: &Path, exploration: &Exploration) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_sample_summaries(dir.join("sample_summary.tsv"), &exploration.sample_summaries)?;
    write_mean_sd(dir.join("mean_sd.tsv"), &exploration.mean_sd)?;
    write_pca_scores(dir.join("pca_scores.tsv"), &exploration.pca)?;
    write_pca_variance(dir.join("pca_variance.tsv"), &exploration.pca)?;
    write_pca_loadings(dir.join("pca_loadings.tsv"), &exploration.pca)?;
    Ok(())
}

fn write_annotation(dir: &Path, annotation: &AnnotationOutput, with_pathways: bool) -> Result<()> {
    write_peak_annotation(
        dir.join("peak_annotation.tsv"),
        &[
            ("pca_loading", annotation.by_loading.as_slice()),
            ("differential", annotation.by_significance.as_slice()),
        ],
    )?;
    if with_pathways {
        write_pathways(
            dir.join("pathways.tsv"),
            &[
                ("pca_loading", annotation.loading_pathways.as_slice()),
                ("differential", annotation.significance_pathways.as_slice()),
            ],
        )?;
    }
    Ok(())
}

/// Every table of a full run plus the effective configuration
pub fn write_pipeline_output(
    dir: &Path,
    output: &PipelineOutput,
    config: &AnalysisConfig,
    with_pathways: bool,
) -> Result<()> {
    write_prepared(dir, &output.prepared)?;
    write_exploration(dir, &output.exploration)?;
    write_results(dir.join("differential_peaks.tsv"), &output.differential.results)?;
    write_ma_points(dir.join("ma_plot.tsv"), &output.ma_points)?;
    write_heatmap(dir.join("heatmap.tsv"), &output.heatmap)?;
    if let Some(annotation) = &output.annotation {
        write_annotation(dir, annotation, with_pathways)?;
    }
    write_run_config(dir.join("run_config.json"), config)?;
    log::info!("Results written to {}", dir.display());
    Ok(())
}
