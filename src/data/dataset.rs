//! PeakDataSet: a count matrix joined with its sample metadata

use super::{CountMatrix, SampleMetadata};
use crate::error::{AtacError, Result};

/// Count matrix plus metadata aligned to its columns.
///
/// The metadata is reordered so that record `j` describes count column `j`.
/// Stages never mutate a dataset; filtering produces a new one.
#[derive(Debug, Clone)]
pub struct PeakDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
}

impl PeakDataSet {
    /// Join counts with metadata by sample identifier.
    ///
    /// Metadata must cover every count column; samples only present in the
    /// metadata are dropped with a warning.
    pub fn align(counts: CountMatrix, metadata: &SampleMetadata) -> Result<Self> {
        let missing: Vec<&str> = counts
            .sample_ids()
            .iter()
            .filter(|id| metadata.get(id).is_none())
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AtacError::format(format!(
                "samples in count table but not in metadata: {:?}",
                missing
            )));
        }

        let extra: Vec<&str> = metadata
            .sample_ids()
            .into_iter()
            .filter(|id| counts.sample_index(id).is_none())
            .collect();
        if !extra.is_empty() {
            log::warn!(
                "Ignoring {} metadata sample(s) absent from the count table: {:?}",
                extra.len(),
                extra
            );
        }

        let metadata = metadata.reorder(counts.sample_ids())?;
        Ok(Self { counts, metadata })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn n_peaks(&self) -> usize {
        self.counts.n_peaks()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// New dataset with a different count matrix over the same samples
    pub fn with_counts(&self, counts: CountMatrix) -> Result<Self> {
        if counts.sample_ids() != self.counts.sample_ids() {
            return Err(AtacError::format(
                "replacement count matrix has different sample columns",
            ));
        }
        Ok(Self {
            counts,
            metadata: self.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Peak, SampleRecord};
    use ndarray::array;

    fn counts() -> CountMatrix {
        CountMatrix::new(
            array![[10.0, 20.0, 30.0]],
            vec![Peak::new("chr1", 0, 100).unwrap()],
            vec!["s2".to_string(), "s1".to_string(), "s3".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_align_reorders_metadata() {
        let meta = SampleMetadata::new(vec![
            SampleRecord::new("s1", "A", "d1"),
            SampleRecord::new("s2", "B", "d1"),
            SampleRecord::new("s3", "A", "d2"),
            SampleRecord::new("s4", "B", "d2"),
        ])
        .unwrap();

        let dataset = PeakDataSet::align(counts(), &meta).unwrap();
        assert_eq!(dataset.metadata().sample_ids(), vec!["s2", "s1", "s3"]);
        assert_eq!(dataset.metadata().records()[0].cell_type, "B");
    }

    #[test]
    fn test_align_fails_on_missing_metadata() {
        let meta = SampleMetadata::new(vec![
            SampleRecord::new("s1", "A", "d1"),
            SampleRecord::new("s2", "B", "d1"),
        ])
        .unwrap();

        let result = PeakDataSet::align(counts(), &meta);
        assert!(matches!(result, Err(AtacError::Format { .. })));
    }
}
