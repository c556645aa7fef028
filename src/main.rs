//! rust_atacseq command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_atacseq::cli::{apply_explore_flags, write_exploration, write_pipeline_output, write_prepared, Cli, Commands, InputArgs};
use rust_atacseq::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            input,
            factor,
            level_a,
            level_b,
            lfc_threshold,
            alpha,
            adjust_for,
            tss,
            gene_sets,
            threads,
        }) => run_analysis(
            &input,
            &factor,
            &level_a,
            &level_b,
            lfc_threshold,
            alpha,
            adjust_for.as_deref(),
            tss.as_deref(),
            gene_sets.as_deref(),
            threads,
        ),
        Some(Commands::Normalize { input }) => run_normalize(&input),
        Some(Commands::Explore { input, vst }) => run_explore(&input, vst),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_no_args() {
    println!("rust_atacseq v{}", VERSION);
    println!("Run `rust_atacseq -h` for usage or `rust_atacseq --help` for detailed information.");
}

fn load(input: &InputArgs) -> Result<(CountMatrix, SampleMetadata)> {
    info!("Loading peak counts from: {}", input.counts);
    let counts = read_count_table(&input.counts)?;
    info!("Loading sample table from: {}", input.metadata);
    let metadata = read_metadata_table(&input.metadata)?;
    Ok((counts, metadata))
}

#[allow(clippy::too_many_arguments)]
fn run_analysis(
    input: &InputArgs,
    factor: &str,
    level_a: &str,
    level_b: &str,
    lfc_threshold: Option<f64>,
    alpha: Option<f64>,
    adjust_for: Option<&str>,
    tss_path: Option<&str>,
    gene_sets_path: Option<&str>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let mut config = input.analysis_config()?;
    if let Some(tau) = lfc_threshold {
        config.test.lfc_threshold = tau;
    }
    if let Some(alpha) = alpha {
        config.test.alpha = alpha;
    }
    config.validate()?;

    let factor: GroupingFactor = factor.parse()?;
    let covariate = adjust_for.map(str::parse::<GroupingFactor>).transpose()?;
    let contrast = Contrast::new(factor, level_a, level_b, config.test.lfc_threshold)?;

    let tss = tss_path.map(TssIndex::from_path).transpose()?;
    let gene_sets = gene_sets_path.map(GeneSetCollection::from_gmt).transpose()?;
    let annotators = tss.as_ref().map(|index| Annotators {
        genes: index as &dyn GeneAnnotator,
        pathways: gene_sets.as_ref().map(|sets| sets as &dyn PathwayEnricher),
    });

    let (counts, metadata) = load(input)?;
    info!("Testing {} (|log2FC| > {})", contrast, contrast.lfc_threshold);
    let output = run_pipeline(counts, &metadata, &contrast, covariate, &config, annotators)?;

    write_pipeline_output(&input.output_dir, &output, &config, gene_sets.is_some())?;
    Ok(())
}

fn run_normalize(input: &InputArgs) -> Result<()> {
    let config = input.analysis_config()?;
    let (counts, metadata) = load(input)?;

    info!("Filtering (max count > {}) and normalizing...", config.filter.min_count);
    let prepared = prepare(counts, &metadata, &config)?;
    info!(
        "Size factors ({:?}): {:?}",
        prepared.size_factors.method(),
        prepared.size_factors.as_slice()
    );

    write_prepared(&input.output_dir, &prepared)?;
    write_run_config_to(input, &config)?;
    info!("Normalized counts written to {}", input.output_dir.display());
    Ok(())
}

fn run_explore(input: &InputArgs, vst: bool) -> Result<()> {
    let mut config = input.analysis_config()?;
    apply_explore_flags(&mut config, vst);
    let (counts, metadata) = load(input)?;

    let prepared = prepare(counts, &metadata, &config)?;
    let exploration = explore_samples(&prepared, &config)?;

    write_prepared(&input.output_dir, &prepared)?;
    write_exploration(&input.output_dir, &exploration)?;
    write_run_config_to(input, &config)?;
    info!("Exploration tables written to {}", input.output_dir.display());
    Ok(())
}

fn write_run_config_to(input: &InputArgs, config: &AnalysisConfig) -> Result<()> {
    rust_atacseq::io::write_run_config(input.output_dir.join("run_config.json"), config)
}
