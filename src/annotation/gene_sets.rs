//! Gene set over-representation analysis

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use statrs::function::factorial::ln_binomial;

use super::{PathwayEnricher, PathwayHit};
use crate::error::{AtacError, Result};
use crate::testing::benjamini_hochberg;

/// A named gene set, e.g. one pathway
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    pub genes: Vec<String>,
}

/// Gene sets tested against a common universe
#[derive(Debug, Clone)]
pub struct GeneSetCollection {
    sets: Vec<GeneSet>,
    universe: HashSet<String>,
}

impl GeneSetCollection {
    /// The universe defaults to the union of all sets
    pub fn new(sets: Vec<GeneSet>) -> Self {
        let universe = sets.iter().flat_map(|s| s.genes.iter().cloned()).collect();
        Self { sets, universe }
    }

    /// Restrict the background to `universe` (e.g. every gene near a peak)
    pub fn with_universe(mut self, universe: impl IntoIterator<Item = String>) -> Self {
        self.universe = universe.into_iter().collect();
        self
    }

    /// Read a GMT file: `name<TAB>description<TAB>gene...` per line
    pub fn from_gmt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let collection = Self::from_gmt_reader(BufReader::new(File::open(path)?))?;
        log::info!(
            "Loaded {} gene sets ({} genes) from {}",
            collection.sets.len(),
            collection.universe.len(),
            path.display()
        );
        Ok(collection)
    }

    pub fn from_gmt_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut sets = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < 3 {
                return Err(AtacError::format(format!(
                    "GMT line {}: expected name, description and at least one gene",
                    i + 1
                )));
            }
            let genes: BTreeSet<String> = fields[2..]
                .iter()
                .filter(|g| !g.is_empty())
                .map(|g| g.to_string())
                .collect();
            sets.push(GeneSet {
                name: fields[0].to_string(),
                description: fields[1].to_string(),
                genes: genes.into_iter().collect(),
            });
        }
        if sets.is_empty() {
            return Err(AtacError::format("GMT file has no gene sets"));
        }
        Ok(Self::new(sets))
    }

    pub fn sets(&self) -> &[GeneSet] {
        &self.sets
    }

    pub fn universe_size(&self) -> usize {
        self.universe.len()
    }
}

impl PathwayEnricher for GeneSetCollection {
    /// Hypergeometric P(X >= k) per set with X ~ Hyper(N, K, n); BH adjusted,
    /// sorted by p-value. Sets without overlap are not reported.
    fn enrich(&self, genes: &[String]) -> Result<Vec<PathwayHit>> {
        let query: HashSet<&str> = genes
            .iter()
            .map(|g| g.as_str())
            .filter(|g| self.universe.contains(*g))
            .collect();
        let big_n = self.universe.len();
        let n = query.len();
        if n == 0 {
            log::warn!("None of the {} query genes are in any gene set", genes.len());
            return Ok(Vec::new());
        }

        let mut hits: Vec<PathwayHit> = Vec::new();
        for set in &self.sets {
            let members: HashSet<&str> = set
                .genes
                .iter()
                .map(|g| g.as_str())
                .filter(|g| self.universe.contains(*g))
                .collect();
            let mut overlap: Vec<String> = members
                .iter()
                .filter(|g| query.contains(*g))
                .map(|g| g.to_string())
                .collect();
            if overlap.is_empty() {
                continue;
            }
            overlap.sort();
            let k = overlap.len();
            hits.push(PathwayHit {
                pathway: set.name.clone(),
                description: set.description.clone(),
                overlap: k,
                set_size: members.len(),
                query_size: n,
                universe_size: big_n,
                expected: n as f64 * members.len() as f64 / big_n as f64,
                pvalue: hypergeometric_upper_tail(k, n, members.len(), big_n),
                padj: f64::NAN,
                genes: overlap,
            });
        }

        let padj = benjamini_hochberg(&hits.iter().map(|h| h.pvalue).collect::<Vec<_>>());
        for (hit, q) in hits.iter_mut().zip(padj) {
            hit.padj = q;
        }
        hits.sort_by(|a, b| a.pvalue.total_cmp(&b.pvalue).then_with(|| a.pathway.cmp(&b.pathway)));

        log::info!(
            "Tested {} gene sets with overlap against {} query genes",
            hits.len(),
            n
        );
        Ok(hits)
    }
}

/// P(X >= k) for X ~ Hypergeometric(population N, successes K, draws n)
fn hypergeometric_upper_tail(k: usize, n: usize, big_k: usize, big_n: usize) -> f64 {
    if k == 0 {
        return 1.0;
    }
    let max_i = n.min(big_k);
    if k > max_i {
        return 0.0;
    }
    let log_denom = ln_binomial(big_n as u64, n as u64);
    let mut sum = 0.0_f64;
    for i in k..=max_i {
        if n - i > big_n - big_k {
            continue;
        }
        let log_p = ln_binomial(big_k as u64, i as u64) + ln_binomial((big_n - big_k) as u64, (n - i) as u64)
            - log_denom;
        sum += log_p.exp();
    }
    sum.min(1.0)
}
