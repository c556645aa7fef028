//! Genomic interval identifying a peak

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AtacError, Result};

/// A peak: a genomic interval of enriched read coverage.
/// Coordinates are kept as given in the input table (no 0/1-based conversion).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Peak {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Peak {
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        let chrom = chrom.into();
        if chrom.is_empty() {
            return Err(AtacError::format("peak chromosome must not be empty"));
        }
        if end < start {
            return Err(AtacError::format(format!(
                "peak {}:{}-{} ends before it starts",
                chrom, start, end
            )));
        }
        Ok(Self { chrom, start, end })
    }

    /// Whether a position falls inside the interval (both ends inclusive)
    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position <= self.end
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}
