//! Tempo estimation from the trustworthy part of a beat grid.
//!
//! The tempo is the median distance between consecutive beats, in samples.
//! A median rather than a mean keeps one missed or doubled beat in the prefix
//! from dragging the whole synthesized tail off the grid.

use crate::error::RepairError;
use serde::{Deserialize, Serialize};

/// How the median is taken when the prefix has an even number of intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MedianPolicy {
    /// Mean of the two middle intervals.
    #[default]
    Textbook,
    /// Mean of the upper-middle interval and the one after it. Reproduces
    /// grids repaired by the old batch script, which indexed one past the
    /// second middle element.
    Historical,
}

/// Estimate the beat interval of `prefix`, the beats up to and including the
/// splice index.
///
/// Returns [`RepairError::NoTrustworthyPrefix`] when fewer than two beats are
/// available, and [`RepairError::MalformedAnnotation`] when the distance
/// between two beats does not fit in an `i64`. The result is not validated here; a non-positive value from a
/// non-monotonic prefix is rejected by [`crate::grid::extrapolate`].
///
/// # Examples
///
/// ```
/// use beatfix::tempo::{estimate_tempo, MedianPolicy};
///
/// // intervals 4, 4, 4, 6
/// let prefix = [0, 4, 8, 12, 18];
/// assert_eq!(estimate_tempo(&prefix, MedianPolicy::Textbook)?, 4.0);
/// assert_eq!(estimate_tempo(&prefix, MedianPolicy::Historical)?, 5.0);
/// # Ok::<(), beatfix::error::RepairError>(())
/// ```
pub fn estimate_tempo(prefix: &[i64], policy: MedianPolicy) -> Result<f64, RepairError> {
    if prefix.len() < 2 {
        return Err(RepairError::NoTrustworthyPrefix {
            available: prefix.len(),
        });
    }

    let mut intervals = prefix
        .windows(2)
        .map(|pair| {
            pair[1].checked_sub(pair[0]).ok_or_else(|| {
                RepairError::MalformedAnnotation(format!(
                    "beat interval between frames {} and {} is out of range",
                    pair[0], pair[1]
                ))
            })
        })
        .collect::<Result<Vec<i64>, RepairError>>()?;
    intervals.sort_unstable();

    let count = intervals.len();
    let mid = count / 2;
    let median = if count % 2 == 1 {
        intervals[mid] as f64
    } else {
        let (low, high) = match policy {
            MedianPolicy::Textbook => (intervals[mid - 1], intervals[mid]),
            MedianPolicy::Historical => (intervals[mid], intervals[(mid + 1).min(count - 1)]),
        };
        (low as f64 + high as f64) / 2.0
    };

    log::debug!("Median of {count} intervals ({policy:?}): {median}");
    Ok(median)
}
