//! Peak-to-gene annotation and pathway enrichment
//!
//! Peaks ranked by PCA loading or by differential significance are mapped
//! to their nearest gene; genes within a distance cutoff are then tested
//! for pathway over-representation. Both lookups sit behind traits so an
//! external annotation source can replace the in-crate implementations.

mod gene_sets;
mod tss;

pub use gene_sets::{GeneSet, GeneSetCollection};
pub use tss::{Strand, Tss, TssIndex};

use std::collections::HashSet;

use serde::Serialize;

use crate::data::Peak;
use crate::error::{AtacError, Result};
use crate::explore::PcaResult;
use crate::io::DifferentialResults;

/// Nearest gene of a peak with the signed TSS distance in bases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearestGene {
    pub gene_id: String,
    /// Negative upstream of the TSS, 0 when the TSS is inside the peak
    pub distance: i64,
}

pub trait GeneAnnotator {
    fn nearest_gene(&self, peak: &Peak) -> Option<NearestGene>;
}

/// One over-represented gene set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathwayHit {
    pub pathway: String,
    pub description: String,
    /// Query genes in the set
    pub overlap: usize,
    pub set_size: usize,
    pub query_size: usize,
    pub universe_size: usize,
    pub expected: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub genes: Vec<String>,
}

pub trait PathwayEnricher {
    fn enrich(&self, genes: &[String]) -> Result<Vec<PathwayHit>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakAnnotation {
    pub peak: Peak,
    pub nearest: Option<NearestGene>,
}

/// Top `top_n` peaks by absolute loading on a 1-based principal component
pub fn rank_by_loading(pca: &PcaResult, component: usize, top_n: usize) -> Result<Vec<Peak>> {
    if component == 0 || component > pca.n_components() {
        return Err(AtacError::InvalidInput {
            reason: format!(
                "component {} requested, PCA has {} component(s)",
                component,
                pca.n_components()
            ),
        });
    }
    Ok(pca
        .peaks_by_loading(component - 1)
        .into_iter()
        .take(top_n)
        .map(|i| pca.peaks[i].clone())
        .collect())
}

/// Peaks with padj < alpha, most significant first; ties by larger |log2FC|
pub fn rank_by_significance(results: &DifferentialResults, alpha: f64) -> Vec<Peak> {
    let mut order: Vec<usize> = (0..results.n_peaks())
        .filter(|&i| results.is_significant(i, alpha))
        .collect();
    order.sort_by(|&a, &b| {
        results.padj[a]
            .total_cmp(&results.padj[b])
            .then_with(|| results.log2_fold_changes[b].abs().total_cmp(&results.log2_fold_changes[a].abs()))
            .then(a.cmp(&b))
    });
    order.into_iter().map(|i| results.peaks[i].clone()).collect()
}

pub fn annotate_peaks<A: GeneAnnotator + ?Sized>(peaks: &[Peak], annotator: &A) -> Vec<PeakAnnotation> {
    let annotations: Vec<PeakAnnotation> = peaks
        .iter()
        .map(|peak| PeakAnnotation {
            peak: peak.clone(),
            nearest: annotator.nearest_gene(peak),
        })
        .collect();
    let unannotated = annotations.iter().filter(|a| a.nearest.is_none()).count();
    if unannotated > 0 {
        log::debug!("{} of {} peaks have no gene on their chromosome", unannotated, peaks.len());
    }
    annotations
}

/// Distinct genes with |distance| <= `cutoff`, in rank order of their first peak
pub fn linked_genes(annotations: &[PeakAnnotation], cutoff: u64) -> Vec<String> {
    let mut seen = HashSet::new();
    annotations
        .iter()
        .filter_map(|a| a.nearest.as_ref())
        .filter(|g| g.distance.unsigned_abs() <= cutoff)
        .filter(|g| seen.insert(g.gene_id.clone()))
        .map(|g| g.gene_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GroupingFactor;
    use crate::testing::Contrast;

    struct FixedAnnotator;

    impl GeneAnnotator for FixedAnnotator {
        fn nearest_gene(&self, peak: &Peak) -> Option<NearestGene> {
            if peak.chrom == "chrM" {
                return None;
            }
            Some(NearestGene {
                gene_id: format!("G{}", peak.start / 10_000),
                distance: peak.start as i64 % 10_000 - 5_000,
            })
        }
    }

    fn peak(chrom: &str, start: u64) -> Peak {
        Peak::new(chrom, start, start + 100).unwrap()
    }

    #[test]
    fn test_linked_genes_cutoff_and_dedup() {
        let peaks = vec![
            peak("chr1", 4_000),  // G0, -1000
            peak("chr1", 6_500),  // G0, +1500
            peak("chr1", 10_000), // G1, -5000
            peak("chr1", 29_999), // G2, +4999
            peak("chr1", 39_000), // G3, +4000
            peak("chrM", 100),
        ];
        let annotations = annotate_peaks(&peaks, &FixedAnnotator);
        assert_eq!(annotations.len(), 6);
        assert!(annotations[5].nearest.is_none());

        assert_eq!(linked_genes(&annotations, 5_000), vec!["G0", "G1", "G2", "G3"]);
        assert_eq!(linked_genes(&annotations, 1_000), vec!["G0"]);
    }

    #[test]
    fn test_rank_by_significance_orders_by_padj() {
        let peaks: Vec<Peak> = (0..4).map(|i| peak("chr1", i * 1000)).collect();
        let contrast = Contrast::new(GroupingFactor::CellType, "X", "Y", 1.0).unwrap();
        let mut res = DifferentialResults::new(peaks.clone(), contrast);
        res.padj = vec![0.01, f64::NAN, 0.001, 0.01];
        res.log2_fold_changes = vec![2.0, 0.0, -4.0, -3.0];

        let ranked = rank_by_significance(&res, 0.05);
        assert_eq!(ranked, vec![peaks[2].clone(), peaks[3].clone(), peaks[0].clone()]);
        assert!(rank_by_significance(&res, 0.0001).is_empty());
    }
}
