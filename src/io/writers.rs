//! Tab-separated output tables
//!
//! Every table starts with a header row. Peaks are written as three
//! `chrom start end` columns; missing values are written as `NA`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::annotation::{PathwayHit, PeakAnnotation};
use crate::config::AnalysisConfig;
use crate::data::Peak;
use crate::error::Result;
use crate::explore::{PcaResult, RowSummary, SampleSummary};
use crate::normalization::{NormalizedCountMatrix, SizeFactors};
use crate::report::{Heatmap, MaPoint};

use super::DifferentialResults;

const PEAK_HEADER: [&str; 3] = ["chrom", "start", "end"];

fn tsv_writer<P: AsRef<Path>>(path: P) -> Result<csv::Writer<BufWriter<File>>> {
    let file = BufWriter::new(File::create(path)?);
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file))
}

/// `NA` for NaN and infinities
fn value(x: f64) -> String {
    if x.is_finite() {
        x.to_string()
    } else {
        "NA".to_string()
    }
}

fn peak_fields(peak: &Peak) -> [String; 3] {
    [peak.chrom.clone(), peak.start.to_string(), peak.end.to_string()]
}

fn header(extra: &[&str]) -> Vec<String> {
    PEAK_HEADER.iter().chain(extra).map(|s| s.to_string()).collect()
}

/// Differential test results, one row per peak
pub fn write_results<P: AsRef<Path>>(path: P, results: &DifferentialResults) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(header(&[
        "baseMean",
        "log2FoldChange",
        "lfcSE",
        "stat",
        "pvalue",
        "padj",
        "dispersion",
        "geneWiseDispersion",
        "trendedDispersion",
    ]))?;
    for (i, peak) in results.peaks.iter().enumerate() {
        let mut record: Vec<String> = peak_fields(peak).to_vec();
        record.extend(
            [
                results.base_means[i],
                results.log2_fold_changes[i],
                results.lfc_se[i],
                results.stat[i],
                results.pvalues[i],
                results.padj[i],
                results.dispersions[i],
                results.gene_wise_dispersions[i],
                results.trended_dispersions[i],
            ]
            .into_iter()
            .map(value),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Peaks x samples matrix with sample ids as column names
pub fn write_normalized_counts<P: AsRef<Path>>(path: P, matrix: &NormalizedCountMatrix) -> Result<()> {
    let ids: Vec<&str> = matrix.sample_ids().iter().map(|s| s.as_str()).collect();
    write_peak_matrix(path, matrix.peaks(), &ids, |i| matrix.peak_values(i).to_vec())
}

pub fn write_heatmap<P: AsRef<Path>>(path: P, heatmap: &Heatmap) -> Result<()> {
    let ids: Vec<&str> = heatmap.sample_ids.iter().map(|s| s.as_str()).collect();
    write_peak_matrix(path, &heatmap.peaks, &ids, |i| heatmap.values.row(i).to_vec())
}

fn write_peak_matrix<P, F>(path: P, peaks: &[Peak], columns: &[&str], row: F) -> Result<()>
where
    P: AsRef<Path>,
    F: Fn(usize) -> Vec<f64>,
{
    let mut writer = tsv_writer(path)?;
    writer.write_record(header(columns))?;
    for (i, peak) in peaks.iter().enumerate() {
        let mut record: Vec<String> = peak_fields(peak).to_vec();
        record.extend(row(i).into_iter().map(value));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_size_factors<P: AsRef<Path>>(path: P, size_factors: &SizeFactors) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["sample", "size_factor"])?;
    for (id, sf) in size_factors.sample_ids().iter().zip(size_factors.values().iter()) {
        writer.write_record([id.clone(), value(*sf)])?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-sample descriptive statistics; one column per requested quantile
pub fn write_sample_summaries<P: AsRef<Path>>(path: P, summaries: &[SampleSummary]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let probs: Vec<f64> = summaries
        .first()
        .map(|s| s.quantiles.iter().map(|&(p, _)| p).collect())
        .unwrap_or_default();

    let mut head: Vec<String> = ["sample", "total", "mean", "sd"].iter().map(|s| s.to_string()).collect();
    head.extend(probs.iter().map(|p| format!("q{}", p)));
    head.extend(
        ["iqr", "upper_fence", "frac_above_upper_fence", "three_iqr", "frac_above_three_iqr"]
            .iter()
            .map(|s| s.to_string()),
    );
    writer.write_record(&head)?;

    for s in summaries {
        let mut record = vec![s.sample.clone(), value(s.total), value(s.mean), value(s.sd)];
        record.extend(s.quantiles.iter().map(|&(_, q)| value(q)));
        record.extend(
            [
                s.iqr,
                s.outliers.upper_fence,
                s.outliers.above_upper_fence_rule,
                s.outliers.three_iqr,
                s.outliers.above_three_iqr,
            ]
            .into_iter()
            .map(value),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_mean_sd<P: AsRef<Path>>(path: P, rows: &[RowSummary]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(header(&["mean", "sd"]))?;
    for row in rows {
        let mut record: Vec<String> = peak_fields(&row.peak).to_vec();
        record.push(value(row.mean));
        record.push(value(row.sd));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn component_names(n: usize) -> Vec<String> {
    (1..=n).map(|k| format!("PC{}", k)).collect()
}

/// Sample coordinates on each component
pub fn write_pca_scores<P: AsRef<Path>>(path: P, pca: &PcaResult) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let mut head = vec!["sample".to_string()];
    head.extend(component_names(pca.n_components()));
    writer.write_record(&head)?;
    for (j, id) in pca.sample_ids.iter().enumerate() {
        let mut record = vec![id.clone()];
        record.extend(pca.scores.row(j).iter().map(|&x| value(x)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_pca_variance<P: AsRef<Path>>(path: P, pca: &PcaResult) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["component", "variance", "proportion", "percent_variance"])?;
    for (k, name) in component_names(pca.n_components()).into_iter().enumerate() {
        writer.write_record([
            name,
            value(pca.variance[k]),
            value(pca.proportion[k]),
            value(pca.percent_variance[k]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Absolute loadings (summing to 1 per component) next to signed rotation
pub fn write_pca_loadings<P: AsRef<Path>>(path: P, pca: &PcaResult) -> Result<()> {
    let names = component_names(pca.n_components());
    let mut columns: Vec<String> = names.iter().map(|n| format!("{}_loading", n)).collect();
    columns.extend(names.iter().map(|n| format!("{}_rotation", n)));
    let columns: Vec<&str> = columns.iter().map(|s| s.as_str()).collect();

    write_peak_matrix(path, &pca.peaks, &columns, |i| {
        pca.loadings
            .row(i)
            .iter()
            .chain(pca.rotation.row(i).iter())
            .copied()
            .collect()
    })
}

pub fn write_ma_points<P: AsRef<Path>>(path: P, points: &[MaPoint]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(header(&["baseMean", "log2FoldChange", "significant"]))?;
    for point in points {
        let mut record: Vec<String> = peak_fields(&point.peak).to_vec();
        record.push(value(point.base_mean));
        record.push(value(point.log2_fold_change));
        record.push(point.significant.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Ranked peaks with their nearest gene, one block per ranking source;
/// `rank` is 1-based within its source
pub fn write_peak_annotation<P: AsRef<Path>>(path: P, sections: &[(&str, &[PeakAnnotation])]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let mut head = vec!["source".to_string(), "rank".to_string()];
    head.extend(header(&["gene_id", "distance"]));
    writer.write_record(&head)?;
    for (source, annotations) in sections {
        for (rank, a) in annotations.iter().enumerate() {
            let mut record = vec![source.to_string(), (rank + 1).to_string()];
            record.extend(peak_fields(&a.peak));
            match &a.nearest {
                Some(g) => {
                    record.push(g.gene_id.clone());
                    record.push(g.distance.to_string());
                }
                None => {
                    record.push("NA".to_string());
                    record.push("NA".to_string());
                }
            }
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_pathways<P: AsRef<Path>>(path: P, sections: &[(&str, &[PathwayHit])]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "source",
        "pathway",
        "description",
        "overlap",
        "set_size",
        "query_size",
        "universe_size",
        "expected",
        "pvalue",
        "padj",
        "genes",
    ])?;
    for (source, hits) in sections {
        for hit in hits.iter() {
            writer.write_record([
                source.to_string(),
                hit.pathway.clone(),
                hit.description.clone(),
                hit.overlap.to_string(),
                hit.set_size.to_string(),
                hit.query_size.to_string(),
                hit.universe_size.to_string(),
                value(hit.expected),
                value(hit.pvalue),
                value(hit.padj),
                hit.genes.join(","),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Effective configuration of a run as pretty JSON
pub fn write_run_config<P: AsRef<Path>>(path: P, config: &AnalysisConfig) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut file, config)?;
    writeln!(file)?;
    file.flush()?;
    Ok(())
}
