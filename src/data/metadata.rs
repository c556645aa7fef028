//! Sample metadata: one typed record per sample

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AtacError, Result};

/// One row of the sample table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample: String,
    pub cell_type: String,
    pub donor: String,
}

impl SampleRecord {
    pub fn new(sample: impl Into<String>, cell_type: impl Into<String>, donor: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            cell_type: cell_type.into(),
            donor: donor.into(),
        }
    }

    /// Level of the given factor for this sample
    pub fn level(&self, factor: GroupingFactor) -> &str {
        match factor {
            GroupingFactor::CellType => &self.cell_type,
            GroupingFactor::Donor => &self.donor,
        }
    }
}

/// Categorical metadata columns usable as a design factor.
/// Donor is an unordered factor like cell type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingFactor {
    CellType,
    Donor,
}

impl GroupingFactor {
    /// The other factor in the table, used as a covariate
    pub fn other(self) -> Self {
        match self {
            GroupingFactor::CellType => GroupingFactor::Donor,
            GroupingFactor::Donor => GroupingFactor::CellType,
        }
    }
}

impl fmt::Display for GroupingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingFactor::CellType => write!(f, "cell_type"),
            GroupingFactor::Donor => write!(f, "donor"),
        }
    }
}

impl FromStr for GroupingFactor {
    type Err = AtacError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "celltype" => Ok(GroupingFactor::CellType),
            "donor" => Ok(GroupingFactor::Donor),
            _ => Err(AtacError::contrast(format!(
                "unknown factor '{}' (expected 'cell_type' or 'donor')",
                s
            ))),
        }
    }
}

/// Sample metadata table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    records: Vec<SampleRecord>,
}

impl SampleMetadata {
    /// Build metadata, rejecting duplicate sample identifiers
    pub fn new(records: Vec<SampleRecord>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.sample.as_str()) {
                return Err(AtacError::format(format!(
                    "duplicate sample '{}' in metadata",
                    record.sample
                )));
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn n_samples(&self) -> usize {
        self.records.len()
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.sample.as_str()).collect()
    }

    pub fn get(&self, sample_id: &str) -> Option<&SampleRecord> {
        self.records.iter().find(|r| r.sample == sample_id)
    }

    /// Factor values in sample order
    pub fn values(&self, factor: GroupingFactor) -> Vec<&str> {
        self.records.iter().map(|r| r.level(factor)).collect()
    }

    /// Unique levels of a factor, sorted
    pub fn levels(&self, factor: GroupingFactor) -> Vec<String> {
        let mut unique: Vec<String> = self.records.iter().map(|r| r.level(factor).to_string()).collect();
        unique.sort();
        unique.dedup();
        unique
    }

    /// Sample indices carrying a given level
    pub fn samples_with_level(&self, factor: GroupingFactor, level: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.level(factor) == level)
            .map(|(i, _)| i)
            .collect()
    }

    /// Reorder (and restrict) to the given sample identifiers.
    /// Every requested sample must be present.
    pub fn reorder(&self, sample_ids: &[String]) -> Result<Self> {
        let records = sample_ids
            .iter()
            .map(|id| {
                self.get(id).cloned().ok_or_else(|| {
                    AtacError::format(format!("sample '{}' has no metadata row", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(vec![
            SampleRecord::new("s1", "Bcell", "d1"),
            SampleRecord::new("s2", "Bcell", "d2"),
            SampleRecord::new("s3", "Tcell", "d1"),
            SampleRecord::new("s4", "Tcell", "d2"),
        ])
        .unwrap()
    }

    #[test]
    fn test_levels_and_membership() {
        let meta = metadata();
        assert_eq!(meta.levels(GroupingFactor::CellType), vec!["Bcell", "Tcell"]);
        assert_eq!(meta.samples_with_level(GroupingFactor::CellType, "Tcell"), vec![2, 3]);
        assert_eq!(meta.samples_with_level(GroupingFactor::Donor, "d1"), vec![0, 2]);
    }

    #[test]
    fn test_duplicate_samples_rejected() {
        let result = SampleMetadata::new(vec![
            SampleRecord::new("s1", "A", "d1"),
            SampleRecord::new("s1", "B", "d2"),
        ]);
        assert!(matches!(result, Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_reorder_requires_all_samples() {
        let meta = metadata();
        let reordered = meta.reorder(&["s3".to_string(), "s1".to_string()]).unwrap();
        assert_eq!(reordered.sample_ids(), vec!["s3", "s1"]);

        let missing = meta.reorder(&["s9".to_string()]);
        assert!(matches!(missing, Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_factor_parsing() {
        assert_eq!("cell_type".parse::<GroupingFactor>().unwrap(), GroupingFactor::CellType);
        assert_eq!("CellType".parse::<GroupingFactor>().unwrap(), GroupingFactor::CellType);
        assert_eq!("donor".parse::<GroupingFactor>().unwrap(), GroupingFactor::Donor);
        assert!("batch".parse::<GroupingFactor>().is_err());
    }
}
