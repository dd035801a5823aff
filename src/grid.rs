//! Beat grid extrapolation and seam smoothing.
//!
//! A beat grid is a strictly increasing list of sample-frame positions. The
//! repair keeps everything before the splice index as detected, appends
//! synthetic beats at a fixed interval until the end of the track, then relaxes
//! the positions from the splice point onward so the change from detected to
//! synthetic spacing is gradual.

use crate::error::RepairError;

/// Relaxation sweeps applied by [`smooth_seam`] unless configured otherwise.
pub const DEFAULT_SMOOTHING_SWEEPS: usize = 10;

/// Append synthetic beats spaced `tempo` samples apart until `duration`.
///
/// The running position starts at `last + tempo` and is truncated to a whole
/// sample after every step, so positions never accumulate rounding in the
/// fractional part. Every appended position is `< duration`.
///
/// Returns the number of appended beats.
///
/// # Errors
///
/// * [`RepairError::InvalidTempo`] if `tempo` is not at least one sample.
///   Anything smaller cannot advance a truncated grid.
/// * [`RepairError::NoTrustworthyPrefix`] if `grid` is empty.
pub fn extrapolate(grid: &mut Vec<i64>, tempo: f64, duration: i64) -> Result<usize, RepairError> {
    if tempo.is_nan() || tempo < 1.0 {
        return Err(RepairError::InvalidTempo(tempo));
    }
    let Some(&last) = grid.last() else {
        return Err(RepairError::NoTrustworthyPrefix { available: 0 });
    };

    let original_len = grid.len();
    let end = duration as f64;
    let mut running = last as f64 + tempo;
    while running < end {
        grid.push(running.trunc() as i64);
        running = (running + tempo).trunc();
    }

    let appended = grid.len() - original_len;
    log::debug!("Appended {appended} beats after frame {last} (tempo {tempo}, duration {duration})");
    Ok(appended)
}

/// Relax the grid around the splice point.
///
/// Works on the window `grid[splice - 1..]`. The first entry of the window is
/// the last untouched trustworthy beat, the final entry is the last beat of the
/// grid, and both stay fixed. Every interior position is replaced by the floor
/// midpoint of its neighbours, sweeping backward on even iterations and
/// forward on odd ones.
///
/// Beats before `splice` are never written. A non-decreasing input stays
/// non-decreasing, since each update lands between its neighbours.
pub fn smooth_seam(grid: &mut [i64], splice: usize, sweeps: usize) {
    if splice == 0 || splice + 1 >= grid.len() {
        log::trace!("Nothing to smooth (splice {splice}, len {})", grid.len());
        return;
    }

    let window = &mut grid[splice - 1..];
    let last_interior = window.len() - 2;

    for sweep in 0..sweeps {
        if sweep % 2 == 0 {
            for i in (1..=last_interior).rev() {
                relax(window, i);
            }
        } else {
            for i in 1..=last_interior {
                relax(window, i);
            }
        }
    }
}

#[inline]
fn relax(window: &mut [i64], i: usize) {
    let before = window[i - 1];
    let after = window[i + 1];
    let midpoint = i128::from(before) + (i128::from(after) - i128::from(before)).div_euclid(2);
    // lies between `before` and `after`, so it fits back into i64
    window[i] = midpoint as i64;
}

/// `true` when no position is smaller than the one before it.
#[must_use]
pub fn is_non_decreasing(grid: &[i64]) -> bool {
    grid.windows(2).all(|pair| pair[0] <= pair[1])
}
