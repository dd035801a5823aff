//! Per-track repair errors.
//!
//! Every variant is local to one track: the batch driver turns it into a
//! [`crate::repair::TrackStatus`] and moves on to the next track. Batch and CLI
//! glue keeps using `anyhow::Result`.

use std::path::Path;
use thiserror::Error;

/// Why a single track could not be repaired.
#[derive(Debug, Error)]
pub enum RepairError {
    /// Fewer than two trustworthy beats, so no interval can be measured.
    #[error("need at least 2 trustworthy beats, found {available}")]
    NoTrustworthyPrefix { available: usize },

    /// The annotation file has no usable `beat_locations.frames` field.
    #[error("annotation data missing: {0}")]
    MissingAnnotationData(String),

    /// The track carries no marker in the slot that marks the splice point.
    #[error("no splice marker in slot {slot}")]
    MissingSpliceMarker { slot: i64 },

    /// The estimated beat interval cannot advance the grid.
    #[error("invalid tempo {0} (interval must be at least one sample)")]
    InvalidTempo(f64),

    /// The annotation file could not be parsed or rewritten in place.
    #[error("malformed annotation: {0}")]
    MalformedAnnotation(String),

    /// Sample rate or duration of the audio file could not be determined.
    #[error("audio probe failed: {0}")]
    AudioProbe(String),

    /// Backup or write failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RepairError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("{action} {}", path.display()), source)
    }

    /// Short, stable name used in reports and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoTrustworthyPrefix { .. } => "no_trustworthy_prefix",
            Self::MissingAnnotationData(_) => "missing_annotation_data",
            Self::MissingSpliceMarker { .. } => "missing_splice_marker",
            Self::InvalidTempo(_) => "invalid_tempo",
            Self::MalformedAnnotation(_) => "malformed_annotation",
            Self::AudioProbe(_) => "audio_probe",
            Self::Io { .. } => "io_failure",
        }
    }

    /// Skips mean "nothing to repair here"; everything else is a failure.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::NoTrustworthyPrefix { .. }
                | Self::MissingAnnotationData(_)
                | Self::MissingSpliceMarker { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_classification() {
        assert!(RepairError::NoTrustworthyPrefix { available: 1 }.is_skip());
        assert!(RepairError::MissingAnnotationData("x".into()).is_skip());
        assert!(RepairError::MissingSpliceMarker { slot: 5 }.is_skip());
        assert!(!RepairError::InvalidTempo(0.0).is_skip());
        assert!(!RepairError::AudioProbe("x".into()).is_skip());

        let io = RepairError::io("copy", std::io::Error::other("disk full"));
        assert!(!io.is_skip());
        assert_eq!(io.kind(), "io_failure");
    }

    #[test]
    fn test_messages_name_the_problem() {
        let err = RepairError::NoTrustworthyPrefix { available: 1 };
        assert_eq!(err.to_string(), "need at least 2 trustworthy beats, found 1");

        let err = RepairError::MissingSpliceMarker { slot: 5 };
        assert_eq!(err.to_string(), "no splice marker in slot 5");
    }
}
