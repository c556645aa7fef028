//! Two-group comparison of one grouping factor

use serde::{Deserialize, Serialize};

use crate::data::{GroupingFactor, SampleMetadata};
use crate::error::{AtacError, Result};

/// `level_a` versus `level_b` of `factor`; a positive log2 fold change means
/// higher accessibility in `level_a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    pub factor: GroupingFactor,
    pub level_a: String,
    pub level_b: String,
    /// |log2 fold change| the test must exceed
    pub lfc_threshold: f64,
}

impl Contrast {
    pub fn new(
        factor: GroupingFactor,
        level_a: impl Into<String>,
        level_b: impl Into<String>,
        lfc_threshold: f64,
    ) -> Result<Self> {
        let level_a = level_a.into();
        let level_b = level_b.into();
        if level_a == level_b {
            return Err(AtacError::contrast(format!(
                "cannot compare level '{}' with itself",
                level_a
            )));
        }
        if !(lfc_threshold >= 0.0 && lfc_threshold.is_finite()) {
            return Err(AtacError::contrast(format!(
                "log2 fold change threshold must be finite and >= 0, got {}",
                lfc_threshold
            )));
        }
        Ok(Self {
            factor,
            level_a,
            level_b,
            lfc_threshold,
        })
    }

    /// Both levels must have at least one sample in `metadata`
    pub fn validate_against(&self, metadata: &SampleMetadata) -> Result<()> {
        for level in [&self.level_a, &self.level_b] {
            if metadata.samples_with_level(self.factor, level).is_empty() {
                return Err(AtacError::contrast(format!(
                    "no samples with {} '{}'",
                    self.factor, level
                )));
            }
        }
        Ok(())
    }

    /// The same comparison in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            factor: self.factor,
            level_a: self.level_b.clone(),
            level_b: self.level_a.clone(),
            lfc_threshold: self.lfc_threshold,
        }
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} vs {}", self.factor, self.level_a, self.level_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleRecord;

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(vec![
            SampleRecord::new("s1", "X", "d1"),
            SampleRecord::new("s2", "X", "d2"),
            SampleRecord::new("s3", "Y", "d1"),
        ])
        .unwrap()
    }

    #[test]
    fn test_same_level_rejected() {
        let result = Contrast::new(GroupingFactor::CellType, "X", "X", 1.0);
        assert!(matches!(result, Err(AtacError::Contrast { .. })));
    }

    #[test]
    fn test_threshold_validated() {
        assert!(Contrast::new(GroupingFactor::CellType, "X", "Y", -0.5).is_err());
        assert!(Contrast::new(GroupingFactor::CellType, "X", "Y", f64::NAN).is_err());
        assert!(Contrast::new(GroupingFactor::CellType, "X", "Y", 0.0).is_ok());
    }

    #[test]
    fn test_empty_level_rejected() {
        let contrast = Contrast::new(GroupingFactor::CellType, "X", "Z", 1.0).unwrap();
        let err = contrast.validate_against(&metadata()).unwrap_err();
        assert!(matches!(err, AtacError::Contrast { .. }));
        assert!(err.to_string().contains("'Z'"));

        let ok = Contrast::new(GroupingFactor::CellType, "Y", "X", 1.0).unwrap();
        assert!(ok.validate_against(&metadata()).is_ok());
    }

    #[test]
    fn test_reversed() {
        let contrast = Contrast::new(GroupingFactor::Donor, "d1", "d2", 0.5).unwrap();
        let rev = contrast.reversed();
        assert_eq!(rev.level_a, "d2");
        assert_eq!(rev.level_b, "d1");
        assert_eq!(rev.reversed(), contrast);
    }
}
