//! Nearest transcription start site lookup

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{GeneAnnotator, NearestGene};
use crate::data::Peak;
use crate::error::{AtacError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Plus,
    Minus,
}

impl FromStr for Strand {
    type Err = AtacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "+" => Ok(Strand::Plus),
            "-" => Ok(Strand::Minus),
            other => Err(AtacError::format(format!("invalid strand '{}'", other))),
        }
    }
}

/// Transcription start site of one gene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tss {
    pub chrom: String,
    pub position: u64,
    pub strand: Strand,
    pub gene_id: String,
}

impl Tss {
    /// Signed distance from the TSS to `peak`: 0 when the TSS lies inside
    /// the peak, negative when the peak is upstream in the gene's direction.
    pub fn signed_distance(&self, peak: &Peak) -> i64 {
        let offset = if peak.contains(self.position) {
            0
        } else if peak.end < self.position {
            -((self.position - peak.end) as i64)
        } else {
            (peak.start - self.position) as i64
        };
        match self.strand {
            Strand::Plus => offset,
            Strand::Minus => -offset,
        }
    }
}

/// TSS positions sorted per chromosome for binary search
#[derive(Debug, Clone, Default)]
pub struct TssIndex {
    by_chrom: HashMap<String, Vec<Tss>>,
}

impl TssIndex {
    pub fn new(sites: Vec<Tss>) -> Self {
        let mut by_chrom: HashMap<String, Vec<Tss>> = HashMap::new();
        for site in sites {
            by_chrom.entry(site.chrom.clone()).or_default().push(site);
        }
        for sites in by_chrom.values_mut() {
            sites.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.gene_id.cmp(&b.gene_id)));
        }
        Self { by_chrom }
    }

    /// Load a `chrom position strand gene_id` table (whitespace-delimited,
    /// no header, `#` comments allowed)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let index = Self::from_reader(BufReader::new(File::open(path)?))?;
        log::info!("Loaded {} TSS from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut sites = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let [chrom, position, strand, gene_id] = fields.as_slice() else {
                return Err(AtacError::format(format!(
                    "TSS line {}: expected 4 columns (chrom position strand gene_id), found {}",
                    i + 1,
                    fields.len()
                )));
            };
            let position = position.parse::<u64>().map_err(|_| {
                AtacError::format(format!("TSS line {}: invalid position '{}'", i + 1, position))
            })?;
            sites.push(Tss {
                chrom: chrom.to_string(),
                position,
                strand: strand.parse()?,
                gene_id: gene_id.to_string(),
            });
        }
        Ok(Self::new(sites))
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chrom.is_empty()
    }

    /// Closest TSS on the peak's chromosome; ties go to the lower position
    pub fn nearest(&self, peak: &Peak) -> Option<(&Tss, i64)> {
        let sites = self.by_chrom.get(&peak.chrom)?;
        let idx = sites.partition_point(|t| t.position < peak.start);

        let mut best: Option<(&Tss, i64)> = None;
        for candidate in [idx.checked_sub(1), Some(idx)].into_iter().flatten() {
            let Some(site) = sites.get(candidate) else {
                continue;
            };
            let distance = site.signed_distance(peak);
            match best {
                Some((_, d)) if d.abs() <= distance.abs() => {}
                _ => best = Some((site, distance)),
            }
        }
        best
    }
}

impl GeneAnnotator for TssIndex {
    fn nearest_gene(&self, peak: &Peak) -> Option<NearestGene> {
        self.nearest(peak).map(|(site, distance)| NearestGene {
            gene_id: site.gene_id.clone(),
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn index() -> TssIndex {
        TssIndex::from_reader(Cursor::new(
            "# chrom pos strand gene\n\
             chr1 1000 + GENE_A\n\
             chr1 5000 - GENE_B\n\
             chr1 20000 + GENE_C\n\
             chr2 300 - GENE_D\n",
        ))
        .unwrap()
    }

    fn peak(chrom: &str, start: u64, end: u64) -> Peak {
        Peak::new(chrom, start, end).unwrap()
    }

    #[test]
    fn test_tss_inside_peak_is_zero() {
        let hit = index().nearest_gene(&peak("chr1", 900, 1100)).unwrap();
        assert_eq!(hit.gene_id, "GENE_A");
        assert_eq!(hit.distance, 0);
    }

    #[test]
    fn test_strand_aware_sign() {
        let idx = index();
        // upstream of a plus-strand gene
        let up = idx.nearest_gene(&peak("chr1", 600, 800)).unwrap();
        assert_eq!((up.gene_id.as_str(), up.distance), ("GENE_A", -200));
        // downstream of a plus-strand gene
        let down = idx.nearest_gene(&peak("chr1", 1300, 1500)).unwrap();
        assert_eq!((down.gene_id.as_str(), down.distance), ("GENE_A", 300));
        // to the right of a minus-strand TSS is upstream
        let minus = idx.nearest_gene(&peak("chr1", 5400, 5600)).unwrap();
        assert_eq!((minus.gene_id.as_str(), minus.distance), ("GENE_B", -400));
        let minus_down = idx.nearest_gene(&peak("chr1", 4000, 4500)).unwrap();
        assert_eq!((minus_down.gene_id.as_str(), minus_down.distance), ("GENE_B", 500));
    }

    #[test]
    fn test_picks_closest_neighbour() {
        let hit = index().nearest_gene(&peak("chr1", 12000, 12100)).unwrap();
        // 7000 from GENE_B, 7900 from GENE_C
        assert_eq!(hit.gene_id, "GENE_B");
        assert_eq!(hit.distance, -7000);
    }

    #[test]
    fn test_unknown_chromosome() {
        assert!(index().nearest_gene(&peak("chrX", 1, 10)).is_none());
        assert_eq!(index().len(), 4);
    }

    #[test]
    fn test_bad_rows_rejected() {
        assert!(TssIndex::from_reader(Cursor::new("chr1 100 + \n")).is_err());
        assert!(TssIndex::from_reader(Cursor::new("chr1 abc + G\n")).is_err());
        assert!(TssIndex::from_reader(Cursor::new("chr1 100 * G\n")).is_err());
    }
}
