//! Analysis configuration threaded through every pipeline stage
//!
//! All knobs live in one serde value so that a run is fully described by its
//! inputs plus this struct. Missing JSON fields fall back to the defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispersion::{DispersionMethod, DispersionParams};
use crate::error::{AtacError, Result};
use crate::glm::GlmFitParams;
use crate::normalization::SizeFactorMethod;

/// Default max-count threshold for keeping a peak
pub const DEFAULT_MIN_COUNT: u32 = 50;
/// Default |log2 fold change| threshold for the Wald test
pub const DEFAULT_LFC_THRESHOLD: f64 = 1.0;
/// Default significance level on adjusted p-values
pub const DEFAULT_ALPHA: f64 = 0.05;
/// Default distance (bases) for linking a peak to a gene
pub const DEFAULT_DISTANCE_CUTOFF: u64 = 5000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub filter: FilterConfig,
    pub normalization: NormalizationConfig,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    pub test: TestConfig,
    pub explore: ExploreConfig,
    pub annotation: AnnotationConfig,
}

impl AnalysisConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        if !(self.test.lfc_threshold >= 0.0 && self.test.lfc_threshold.is_finite()) {
            return Err(AtacError::InvalidInput {
                reason: format!("lfc_threshold must be >= 0, got {}", self.test.lfc_threshold),
            });
        }
        if !(self.test.alpha > 0.0 && self.test.alpha < 1.0) {
            return Err(AtacError::InvalidInput {
                reason: format!("alpha must be in (0, 1), got {}", self.test.alpha),
            });
        }
        if let Some(bad) = self.explore.quantiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(AtacError::InvalidInput {
                reason: format!("quantile probabilities must be in [0, 1], got {}", bad),
            });
        }
        if self.dispersion.min_disp <= 0.0 {
            return Err(AtacError::InvalidInput {
                reason: "min_disp must be positive".to_string(),
            });
        }
        if self.explore.n_components == Some(0) {
            return Err(AtacError::InvalidInput {
                reason: "n_components must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Peaks are kept iff their max count across samples exceeds this
    pub min_count: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_count: DEFAULT_MIN_COUNT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub method: SizeFactorMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub lfc_threshold: f64,
    pub alpha: f64,
    pub dispersion_method: DispersionMethod,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            lfc_threshold: DEFAULT_LFC_THRESHOLD,
            alpha: DEFAULT_ALPHA,
            dispersion_method: DispersionMethod::default(),
        }
    }
}

/// Matrix fed to PCA
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcaInput {
    /// Size-factor normalized counts
    #[default]
    Normalized,
    /// Parametric variance-stabilized counts (blind dispersion fit)
    Vst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploreConfig {
    /// Probabilities reported in the per-sample summary
    pub quantiles: Vec<f64>,
    /// Number of components to keep; all non-degenerate ones when unset
    pub n_components: Option<usize>,
    pub pca_input: PcaInput,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            quantiles: vec![0.0, 0.25, 0.5, 0.75, 1.0],
            n_components: None,
            pca_input: PcaInput::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Max |distance| to the TSS for a peak to count as linked to a gene
    pub distance_cutoff: u64,
    /// Number of top-loading peaks taken from the PCA component
    pub top_peaks: usize,
    /// 1-based principal component used for loading-ranked peaks
    pub loading_component: usize,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            distance_cutoff: DEFAULT_DISTANCE_CUTOFF,
            top_peaks: 500,
            loading_component: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.filter.min_count, 50);
        assert_eq!(config.test.lfc_threshold, 1.0);
        assert_eq!(config.annotation.distance_cutoff, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(r#"{"filter": {"min_count": 10}, "test": {"alpha": 0.1}}"#).unwrap();
        assert_eq!(config.filter.min_count, 10);
        assert_eq!(config.test.alpha, 0.1);
        assert_eq!(config.test.lfc_threshold, 1.0);
        assert_eq!(config.explore.pca_input, PcaInput::Normalized);
    }

    #[test]
    fn test_json_round_trip_of_enums() {
        let config = AnalysisConfig::from_json(
            r#"{"normalization": {"method": "ratio"}, "explore": {"pca_input": "vst"}}"#,
        )
        .unwrap();
        assert_eq!(config.normalization.method, SizeFactorMethod::Ratio);
        assert_eq!(config.explore.pca_input, PcaInput::Vst);
        let text = config.to_json().unwrap();
        assert!(text.contains("\"vst\""));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AnalysisConfig::from_json(r#"{"test": {"lfc_threshold": -1.0}}"#).is_err());
        assert!(AnalysisConfig::from_json(r#"{"test": {"alpha": 1.5}}"#).is_err());
        assert!(AnalysisConfig::from_json(r#"{"explore": {"quantiles": [0.5, 2.0]}}"#).is_err());
    }
}
