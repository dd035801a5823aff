//! Catalog records for tracks, and the splice marker carried by them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Marker slot that marks the splice point unless configured otherwise.
/// Slot numbers are zero based; the player UI shows them as slot + 1.
pub const DEFAULT_SPLICE_SLOT: i64 = 5;

/// A jump/cue marker set on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Beat index or sample frame, depending on [`MarkerUnit`].
    pub start: i64,
}

/// How a track is stored in the catalog.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Track {
    /// SQL row id of the audio work.
    pub id: i64,
    pub artist: String,
    pub name: String,
    /// YAML sidecar holding the beat grid, if one was ever written.
    pub annotation_file: Option<PathBuf>,
    pub audio_file: PathBuf,
    /// Catalogued length. Only used when the audio probe cannot tell.
    pub milliseconds: Option<i64>,
    /// Markers by slot.
    pub markers: BTreeMap<i64, Marker>,
}

impl Track {
    /// `artist - name`, for logs.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.artist.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.artist, self.name)
        }
    }
}

/// Unit of a marker's `start` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarkerUnit {
    /// `start` is the index of the last good beat. Markers set by snapping to
    /// the grid are stored this way.
    #[default]
    Beat,
    /// `start` is a sample frame; the splice is the last beat at or before it.
    Frame,
}

/// Resolve a marker to an index into `frames`.
///
/// Beat indices past the end of the grid clamp to the last beat. Returns
/// `None` when the marker lies before the first beat or `frames` is empty.
#[must_use]
pub fn splice_index(frames: &[i64], marker: Marker, unit: MarkerUnit) -> Option<usize> {
    let last = frames.len().checked_sub(1)?;
    match unit {
        MarkerUnit::Beat => {
            let index = usize::try_from(marker.start).ok()?;
            if index > last {
                log::warn!("Splice beat {index} is past the last beat {last}, clamping");
            }
            Some(index.min(last))
        }
        MarkerUnit::Frame => frames.iter().rposition(|&frame| frame <= marker.start),
    }
}
