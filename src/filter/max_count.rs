//! Low-signal peak filtering by maximum count

use crate::data::{CountMatrix, Peak};
use crate::error::{AtacError, Result};

/// Outcome of the max-count filter
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Retained peaks in their original order
    pub counts: CountMatrix,
    /// Peaks whose maximum count did not exceed the threshold
    pub dropped: Vec<Peak>,
    pub threshold: u32,
}

impl FilterOutcome {
    pub fn n_kept(&self) -> usize {
        self.counts.n_peaks()
    }

    pub fn n_dropped(&self) -> usize {
        self.dropped.len()
    }
}

/// Keep a peak iff its maximum count across all samples is strictly greater
/// than `threshold`. Row order of the survivors is preserved.
pub fn filter_by_max_count(counts: &CountMatrix, threshold: u32) -> Result<FilterOutcome> {
    let cutoff = f64::from(threshold);
    let maxima = counts.row_maxima();

    let (keep, drop): (Vec<usize>, Vec<usize>) = (0..counts.n_peaks()).partition(|&i| maxima[i] > cutoff);

    log::info!(
        "Max-count filter (> {}): kept {} of {} peaks",
        threshold,
        keep.len(),
        counts.n_peaks()
    );

    if keep.is_empty() {
        return Err(AtacError::insufficient(format!(
            "no peak has a count above {} in any sample",
            threshold
        )));
    }

    let dropped = drop.iter().map(|&i| counts.peaks()[i].clone()).collect();

    Ok(FilterOutcome {
        counts: counts.subset_peaks(&keep)?,
        dropped,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        let peaks = (0..4)
            .map(|i| Peak::new("chr2", i * 1000, i * 1000 + 300).unwrap())
            .collect();
        CountMatrix::new(
            array![
                [5.0, 3.0, 7.0, 2.0],
                [50.0, 49.0, 10.0, 0.0],
                [51.0, 0.0, 0.0, 0.0],
                [100.0, 120.0, 90.0, 80.0]
            ],
            peaks,
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_is_strict() {
        let input = matrix();
        let outcome = filter_by_max_count(&input, 50).unwrap();

        // max == 50 is dropped, max == 51 is kept
        assert_eq!(outcome.n_kept(), 2);
        assert_eq!(outcome.counts.peaks()[0], input.peaks()[2]);
        assert_eq!(outcome.counts.peaks()[1], input.peaks()[3]);
        assert_eq!(outcome.dropped, vec![input.peaks()[0].clone(), input.peaks()[1].clone()]);
    }

    #[test]
    fn test_partition_property() {
        let input = matrix();
        for threshold in [0, 10, 50, 99, 119] {
            let outcome = filter_by_max_count(&input, threshold).unwrap();
            for (i, peak) in input.peaks().iter().enumerate() {
                let max = input.peak_counts(i).iter().copied().fold(0.0, f64::max);
                let kept = outcome.counts.peak_index(peak).is_some();
                assert_eq!(kept, max > threshold as f64);
            }
            assert_eq!(outcome.n_kept() + outcome.n_dropped(), input.n_peaks());
            assert_eq!(outcome.counts.sample_ids(), input.sample_ids());
        }
    }

    #[test]
    fn test_everything_dropped_is_an_error() {
        let result = filter_by_max_count(&matrix(), 500);
        assert!(matches!(result, Err(AtacError::InsufficientData { .. })));
    }
}
