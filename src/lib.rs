//! rust_atacseq: differential chromatin accessibility from ATAC-Seq peak counts
//!
//! The pipeline reads a peak x sample count table and a sample sheet, drops
//! low-signal peaks, normalizes library sizes, explores the samples
//! (summaries, PCA) and calls differentially accessible peaks with a
//! negative binomial model and a thresholded Wald test. Ranked peaks can then
//! be linked to their nearest genes and tested for pathway enrichment.
//!
//! # Example
//!
//! ```ignore
//! use rust_atacseq::prelude::*;
//!
//! let counts = read_count_table("peaks.counts.tsv")?;
//! let metadata = read_metadata_table("samples.tsv")?;
//! let config = AnalysisConfig::default();
//! let contrast = Contrast::new(GroupingFactor::CellType, "Bcell", "Tcell", 1.0)?;
//!
//! let output = run_pipeline(counts, &metadata, &contrast, None, &config, None)?;
//! println!("{}", output.differential.results.summary(config.test.alpha));
//! ```

pub mod annotation;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod explore;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod report;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::annotation::{
        annotate_peaks, linked_genes, rank_by_loading, rank_by_significance, GeneAnnotator, GeneSetCollection,
        NearestGene, PathwayEnricher, PathwayHit, PeakAnnotation, TssIndex,
    };
    pub use crate::config::{AnalysisConfig, PcaInput};
    pub use crate::data::{CountMatrix, GroupingFactor, Peak, PeakDataSet, SampleMetadata, SampleRecord};
    pub use crate::dispersion::{estimate_dispersions, DispersionMethod, DispersionParams};
    pub use crate::error::{AtacError, Result};
    pub use crate::explore::{principal_components, row_mean_sd_summary, summarize_samples, PcaResult};
    pub use crate::filter::{filter_by_max_count, FilterOutcome};
    pub use crate::glm::{DesignSpec, GlmFitParams};
    pub use crate::io::{read_count_table, read_metadata_table, DifferentialResults};
    pub use crate::normalization::{estimate_size_factors, normalize, NormalizedCountMatrix, SizeFactorMethod, SizeFactors};
    pub use crate::report::{ma_points, significant_heatmap, Heatmap, MaPoint};
    pub use crate::testing::{benjamini_hochberg, differential_peaks, Contrast, DifferentialOutput, DifferentialParams};
    pub use crate::transform::{blind_vst, vst, VstResult};
    pub use crate::{annotate, explore_samples, prepare, run_pipeline, Annotators, AnnotationOutput, Exploration, PipelineOutput, PreparedData};
}

use crate::explore::{RowSummary, SampleSummary};
use prelude::*;

/// Filtered counts with their normalization
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Counts of the retained peaks joined with the metadata
    pub dataset: PeakDataSet,
    /// Peaks removed by the max-count filter
    pub dropped: Vec<Peak>,
    pub size_factors: SizeFactors,
    pub normalized: NormalizedCountMatrix,
}

/// Load-side stages: join, max-count filter, size factors, normalization
pub fn prepare(counts: CountMatrix, metadata: &SampleMetadata, config: &AnalysisConfig) -> Result<PreparedData> {
    let aligned = PeakDataSet::align(counts, metadata)?;
    let outcome = filter_by_max_count(aligned.counts(), config.filter.min_count)?;
    let dropped = outcome.dropped;
    let dataset = aligned.with_counts(outcome.counts)?;

    let size_factors = estimate_size_factors(&dataset, config.normalization.method)?;
    let normalized = normalize(dataset.counts(), &size_factors)?;

    Ok(PreparedData {
        dataset,
        dropped,
        size_factors,
        normalized,
    })
}

/// Exploratory statistics of a prepared dataset
#[derive(Debug, Clone)]
pub struct Exploration {
    pub sample_summaries: Vec<SampleSummary>,
    /// Per-peak mean and SD of the normalized counts
    pub mean_sd: Vec<RowSummary>,
    pub pca: PcaResult,
}

pub fn explore_samples(prepared: &PreparedData, config: &AnalysisConfig) -> Result<Exploration> {
    let sample_summaries = summarize_samples(prepared.dataset.counts(), &config.explore.quantiles)?;
    let mean_sd = row_mean_sd_summary(&prepared.normalized);

    let pca = match config.explore.pca_input {
        PcaInput::Normalized => principal_components(&prepared.normalized, config.explore.n_components)?,
        PcaInput::Vst => {
            let transformed = blind_vst(
                prepared.dataset.counts(),
                &prepared.size_factors,
                &prepared.normalized,
                &config.dispersion,
            )?;
            principal_components(&transformed.data, config.explore.n_components)?
        }
    };
    log::info!(
        "PCA: {} component(s), variance explained {:?}%",
        pca.n_components(),
        pca.percent_variance
    );

    Ok(Exploration {
        sample_summaries,
        mean_sd,
        pca,
    })
}

/// Gene lookup and optional pathway enrichment used by [`annotate`]
#[derive(Clone, Copy)]
pub struct Annotators<'a> {
    pub genes: &'a dyn GeneAnnotator,
    pub pathways: Option<&'a dyn PathwayEnricher>,
}

/// Annotated peak rankings and their enrichment
#[derive(Debug, Clone, Default)]
pub struct AnnotationOutput {
    /// Top peaks by loading on the configured principal component
    pub by_loading: Vec<PeakAnnotation>,
    /// Significant peaks, most significant first
    pub by_significance: Vec<PeakAnnotation>,
    pub loading_pathways: Vec<PathwayHit>,
    pub significance_pathways: Vec<PathwayHit>,
}

/// Link PCA-ranked and significance-ranked peaks to genes and test the
/// genes within the distance cutoff for pathway enrichment
pub fn annotate(
    pca: &PcaResult,
    results: &DifferentialResults,
    annotators: Annotators<'_>,
    config: &AnalysisConfig,
) -> Result<AnnotationOutput> {
    let cfg = &config.annotation;
    let by_loading = annotate_peaks(
        &rank_by_loading(pca, cfg.loading_component, cfg.top_peaks)?,
        annotators.genes,
    );
    let by_significance = annotate_peaks(&rank_by_significance(results, config.test.alpha), annotators.genes);

    let mut output = AnnotationOutput {
        by_loading,
        by_significance,
        ..Default::default()
    };

    if let Some(enricher) = annotators.pathways {
        let loading_genes = linked_genes(&output.by_loading, cfg.distance_cutoff);
        let significance_genes = linked_genes(&output.by_significance, cfg.distance_cutoff);
        log::info!(
            "Genes within {} bp: {} from PC{} loadings, {} from significant peaks",
            cfg.distance_cutoff,
            loading_genes.len(),
            cfg.loading_component,
            significance_genes.len()
        );
        output.loading_pathways = enricher.enrich(&loading_genes)?;
        output.significance_pathways = enricher.enrich(&significance_genes)?;
    }
    Ok(output)
}

/// Everything a full run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub prepared: PreparedData,
    pub exploration: Exploration,
    pub differential: DifferentialOutput,
    pub ma_points: Vec<MaPoint>,
    pub heatmap: Heatmap,
    pub annotation: Option<AnnotationOutput>,
}

/// Run every stage on one contrast.
///
/// `covariate` adds the other metadata factor (e.g. donor) to the model.
/// Annotation runs only when `annotators` is given.
pub fn run_pipeline(
    counts: CountMatrix,
    metadata: &SampleMetadata,
    contrast: &Contrast,
    covariate: Option<GroupingFactor>,
    config: &AnalysisConfig,
    annotators: Option<Annotators<'_>>,
) -> Result<PipelineOutput> {
    config.validate()?;

    let prepared = prepare(counts, metadata, config)?;
    let exploration = explore_samples(&prepared, config)?;

    let design = match covariate {
        Some(cov) => DesignSpec::adjusted_for(contrast.factor, cov)?,
        None => DesignSpec::new(contrast.factor),
    };
    let params = DifferentialParams {
        dispersion_method: config.test.dispersion_method,
        dispersion: config.dispersion.clone(),
        glm: config.glm.clone(),
    };
    let differential = differential_peaks(
        &prepared.dataset,
        &prepared.size_factors,
        &prepared.normalized,
        contrast,
        &design,
        &params,
    )?;

    let alpha = config.test.alpha;
    let ma = ma_points(&differential.results, alpha);
    let heatmap = significant_heatmap(&differential.results, &prepared.normalized, alpha)?;

    let annotation = match annotators {
        Some(a) => Some(annotate(&exploration.pca, &differential.results, a, config)?),
        None => None,
    };

    log::info!("{}", differential.results.summary(alpha));

    Ok(PipelineOutput {
        prepared,
        exploration,
        differential,
        ma_points: ma,
        heatmap,
        annotation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use std::io::Cursor;

    fn peaks(n: usize) -> Vec<Peak> {
        (0..n)
            .map(|i| Peak::new("chr1", 1000 + i as u64 * 10_000, 1500 + i as u64 * 10_000).unwrap())
            .collect()
    }

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(vec![
            SampleRecord::new("s1", "X", "d1"),
            SampleRecord::new("s2", "X", "d2"),
            SampleRecord::new("s3", "Y", "d1"),
            SampleRecord::new("s4", "Y", "d2"),
        ])
        .unwrap()
    }

    fn counts(values: Array2<f64>) -> CountMatrix {
        let ids = vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()];
        let n = values.nrows();
        CountMatrix::new(values, peaks(n), ids).unwrap()
    }

    fn scenario() -> Array2<f64> {
        array![
            [100.0, 110.0, 10.0, 12.0],
            [200.0, 205.0, 198.0, 202.0],
            [500.0, 495.0, 505.0, 500.0],
            [80.0, 82.0, 79.0, 81.0],
            [1000.0, 990.0, 1010.0, 1000.0],
            [5.0, 3.0, 7.0, 2.0]
        ]
    }

    fn contrast() -> Contrast {
        Contrast::new(GroupingFactor::CellType, "X", "Y", 1.0).unwrap()
    }

    #[test]
    fn test_only_the_shifted_peak_is_significant() {
        let config = AnalysisConfig::default();
        let out = run_pipeline(counts(scenario()), &metadata(), &contrast(), None, &config, None).unwrap();
        let res = &out.differential.results;

        assert_eq!(res.n_peaks(), 5);
        assert!(res.padj[0] < 0.05, "P1 padj = {}", res.padj[0]);
        for i in 1..5 {
            assert!(res.padj[i] > 0.05, "peak {} padj = {}", i, res.padj[i]);
        }
        assert_eq!(out.heatmap.peaks, vec![res.peaks[0].clone()]);
        assert_eq!(out.ma_points.iter().filter(|p| p.significant).count(), 1);
    }

    #[test]
    fn test_sub_threshold_peak_absent_downstream() {
        let low = peaks(6)[5].clone();
        let config = AnalysisConfig::default();
        let out = run_pipeline(counts(scenario()), &metadata(), &contrast(), None, &config, None).unwrap();

        assert_eq!(out.prepared.dropped, vec![low.clone()]);
        assert!(out.prepared.dataset.counts().peak_index(&low).is_none());
        assert!(!out.prepared.normalized.peaks().contains(&low));
        assert!(!out.differential.results.peaks.contains(&low));
        assert!(!out.exploration.pca.peaks.contains(&low));
        assert_eq!(out.exploration.mean_sd.len(), 5);
        assert!(out.ma_points.iter().all(|p| p.peak != low));
    }

    #[test]
    fn test_exploration_with_vst_input() {
        let mut config = AnalysisConfig::default();
        config.explore.pca_input = PcaInput::Vst;
        let prepared = prepare(counts(scenario()), &metadata(), &config).unwrap();
        let exploration = explore_samples(&prepared, &config).unwrap();

        assert_eq!(exploration.sample_summaries.len(), 4);
        assert_eq!(exploration.pca.scores.nrows(), 4);
        assert!(exploration.pca.n_components() >= 1);
    }

    #[test]
    fn test_donor_adjusted_run() {
        let config = AnalysisConfig::default();
        let out = run_pipeline(
            counts(scenario()),
            &metadata(),
            &contrast(),
            Some(GroupingFactor::Donor),
            &config,
            None,
        )
        .unwrap();
        assert_eq!(out.differential.design.n_coef(), 3);
        assert!(out.differential.results.log2_fold_changes[0] > 2.5);
    }

    #[test]
    fn test_pipeline_with_annotation() {
        // P1 spans chr1:1000-1500; GENE_A starts inside it
        let tss = TssIndex::from_reader(Cursor::new(
            "chr1 1200 + GENE_A\n\
             chr1 11200 + GENE_B\n\
             chr1 21200 - GENE_C\n\
             chr1 31200 + GENE_D\n\
             chr1 41200 + GENE_E\n",
        ))
        .unwrap();
        let sets = GeneSetCollection::from_gmt_reader(Cursor::new(
            "OPEN\tpeaks opening in X\tGENE_A\tGENE_F\n\
             OTHER\tunrelated\tGENE_B\tGENE_C\tGENE_G\tGENE_H\n",
        ))
        .unwrap();

        let mut config = AnalysisConfig::default();
        config.annotation.top_peaks = 3;
        let annotators = Annotators {
            genes: &tss,
            pathways: Some(&sets),
        };
        let out = run_pipeline(
            counts(scenario()),
            &metadata(),
            &contrast(),
            None,
            &config,
            Some(annotators),
        )
        .unwrap();
        let annotation = out.annotation.unwrap();

        assert_eq!(annotation.by_loading.len(), 3);
        assert_eq!(annotation.by_significance.len(), 1);
        let nearest = annotation.by_significance[0].nearest.as_ref().unwrap();
        assert_eq!((nearest.gene_id.as_str(), nearest.distance), ("GENE_A", 0));

        assert_eq!(annotation.significance_pathways.len(), 1);
        assert_eq!(annotation.significance_pathways[0].pathway, "OPEN");
        assert_eq!(annotation.significance_pathways[0].genes, vec!["GENE_A"]);
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let mut config = AnalysisConfig::default();
        config.test.alpha = 1.5;
        let result = run_pipeline(counts(scenario()), &metadata(), &contrast(), None, &config, None);
        assert!(matches!(result, Err(AtacError::InvalidInput { .. })));
    }

    #[test]
    fn test_everything_filtered_is_insufficient() {
        let mut config = AnalysisConfig::default();
        config.filter.min_count = 5000;
        let result = prepare(counts(scenario()), &metadata(), &config);
        assert!(matches!(result, Err(AtacError::InsufficientData { .. })));
    }
}
