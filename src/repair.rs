//! # Repair Module
//!
//! Drives the repair of every track carrying the repair tag:
//!
//! 1. find the splice marker and load the annotation's beat grid
//! 2. estimate the tempo from the beats up to the splice
//! 3. extend the grid at that tempo to the end of the track
//! 4. smooth the seam
//! 5. back up the annotation and write the new grid into it
//!
//! Tracks are handled one at a time. A track that cannot be repaired is logged
//! and reported; it never stops the batch.

use crate::annotation::AnnotationDocument;
use crate::config::default_backup_dir;
use crate::db::TrackCatalog;
use crate::error::RepairError;
use crate::grid::{extrapolate, is_non_decreasing, smooth_seam, DEFAULT_SMOOTHING_SWEEPS};
use crate::probe::{frames_from_millis, AudioProbe};
use crate::tempo::{estimate_tempo, MedianPolicy};
use crate::track::{splice_index, MarkerUnit, Track, DEFAULT_SPLICE_SLOT};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tag that selects tracks for repair unless configured otherwise.
pub const DEFAULT_REPAIR_TAG: &str = "ends_off_beat";

/// Knobs of a repair run. Every field can come from the config file and be
/// overridden on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairOptions {
    pub tag: String,
    pub marker_slot: i64,
    pub marker_unit: MarkerUnit,
    pub median_policy: MedianPolicy,
    pub smoothing_sweeps: usize,
    /// Where annotation backups go. `None` means [`default_backup_dir`].
    pub backup_dir: Option<PathBuf>,
    /// Compute and report, but leave annotation files alone.
    pub dry_run: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            tag: DEFAULT_REPAIR_TAG.to_string(),
            marker_slot: DEFAULT_SPLICE_SLOT,
            marker_unit: MarkerUnit::default(),
            median_policy: MedianPolicy::default(),
            smoothing_sweeps: DEFAULT_SMOOTHING_SWEEPS,
            backup_dir: None,
            dry_run: false,
        }
    }
}

/// Outcome for one track.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackStatus {
    Repaired {
        tempo: f64,
        splice_index: usize,
        original_len: usize,
        repaired_len: usize,
        appended: usize,
        /// `None` on a dry run.
        backup: Option<PathBuf>,
    },
    Skipped {
        kind: String,
        reason: String,
    },
    Failed {
        kind: String,
        reason: String,
    },
}

impl TrackStatus {
    fn from_error(err: &RepairError) -> Self {
        let kind = err.kind().to_string();
        let reason = err.to_string();
        if err.is_skip() {
            Self::Skipped { kind, reason }
        } else {
            Self::Failed { kind, reason }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub track_id: i64,
    pub artist: String,
    pub name: String,
    pub status: TrackStatus,
}

/// Everything a batch did, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub tag: String,
    pub dry_run: bool,
    pub repaired: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tracks: Vec<TrackReport>,
}

impl BatchReport {
    fn new(tag: &str, dry_run: bool) -> Self {
        Self {
            tag: tag.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    fn push(&mut self, report: TrackReport) {
        match report.status {
            TrackStatus::Repaired { .. } => self.repaired += 1,
            TrackStatus::Skipped { .. } => self.skipped += 1,
            TrackStatus::Failed { .. } => self.failed += 1,
        }
        self.tracks.push(report);
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} repaired, {} skipped, {} failed ({} tracks tagged `{}`{})",
            self.repaired,
            self.skipped,
            self.failed,
            self.tracks.len(),
            self.tag,
            if self.dry_run { ", dry run" } else { "" }
        )
    }
}

/// One repair run over a catalog.
pub struct RepairBatch<'a> {
    catalog: &'a dyn TrackCatalog,
    probe: &'a dyn AudioProbe,
    options: RepairOptions,
    backup_dir: PathBuf,
}

impl<'a> RepairBatch<'a> {
    pub fn new(catalog: &'a dyn TrackCatalog, probe: &'a dyn AudioProbe, options: RepairOptions) -> Self {
        let backup_dir = options.backup_dir.clone().unwrap_or_else(default_backup_dir);
        Self {
            catalog,
            probe,
            options,
            backup_dir,
        }
    }

    /// Repair every track carrying the configured tag.
    ///
    /// Only a failure to list the tracks is an error; per-track problems end
    /// up in the report.
    pub fn run(&self) -> Result<BatchReport> {
        let tag = &self.options.tag;
        let tracks = self
            .catalog
            .tracks_for_tag(tag)
            .with_context(|| format!("Failed to list tracks tagged `{tag}`"))?;
        info!("Repairing {} tracks tagged `{tag}`", tracks.len());

        let mut report = BatchReport::new(tag, self.options.dry_run);
        for track in &tracks {
            report.push(self.process(track));
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Repair one track and report what happened.
    pub fn process(&self, track: &Track) -> TrackReport {
        let status = match self.repair_track(track) {
            Ok(status) => {
                info!("{}: repaired", track.display_name());
                status
            }
            Err(err) if err.is_skip() => {
                warn!("{}: skipped, {err}", track.display_name());
                TrackStatus::from_error(&err)
            }
            Err(err) => {
                warn!("{}: failed, {err}", track.display_name());
                TrackStatus::from_error(&err)
            }
        };

        TrackReport {
            track_id: track.id,
            artist: track.artist.clone(),
            name: track.name.clone(),
            status,
        }
    }

    fn repair_track(&self, track: &Track) -> Result<TrackStatus, RepairError> {
        let slot = self.options.marker_slot;
        let marker = track
            .markers
            .get(&slot)
            .copied()
            .ok_or(RepairError::MissingSpliceMarker { slot })?;

        let annotation_path = track.annotation_file.as_deref().ok_or_else(|| {
            RepairError::MissingAnnotationData("no annotation file in catalog".to_string())
        })?;
        let document = AnnotationDocument::load(annotation_path)?;
        let frames = document.frames()?;

        let splice = splice_index(&frames, marker, self.options.marker_unit)
            .ok_or(RepairError::NoTrustworthyPrefix { available: 0 })?;
        let mut grid = frames[..=splice].to_vec();
        debug!(
            "{}: splice at beat {splice} of {} (marker {})",
            track.display_name(),
            frames.len(),
            marker.start
        );

        let tempo = estimate_tempo(&grid, self.options.median_policy)?;
        let (sample_rate, duration) = self.track_length(track)?;
        debug!("{}: tempo {tempo}, {duration} frames at {sample_rate} Hz", track.display_name());

        let appended = extrapolate(&mut grid, tempo, duration)?;
        smooth_seam(&mut grid, splice, self.options.smoothing_sweeps);
        if !is_non_decreasing(&grid) {
            return Err(RepairError::MalformedAnnotation(
                "beat grid decreases before the splice".to_string(),
            ));
        }

        let backup = if self.options.dry_run {
            info!("{}: dry run, {} left as is", track.display_name(), annotation_path.display());
            None
        } else {
            Some(document.write_frames(&grid, &self.backup_dir)?.into_path())
        };

        Ok(TrackStatus::Repaired {
            tempo,
            splice_index: splice,
            original_len: frames.len(),
            repaired_len: grid.len(),
            appended,
            backup,
        })
    }

    /// Sample rate and length in frames of the track's audio.
    fn track_length(&self, track: &Track) -> Result<(u32, i64), RepairError> {
        let audio = &track.audio_file;
        let sample_rate = self
            .probe
            .sample_rate(audio)
            .map_err(|err| RepairError::AudioProbe(format!("{err:#}")))?;

        let duration = match self.probe.duration_samples(audio, sample_rate) {
            Ok(duration) => duration,
            Err(err) => match track.milliseconds {
                Some(milliseconds) => {
                    warn!(
                        "{}: {err:#}, using catalogued length of {milliseconds} ms",
                        track.display_name()
                    );
                    frames_from_millis(milliseconds, sample_rate)
                }
                None => return Err(RepairError::AudioProbe(format!("{err:#}"))),
            },
        };
        Ok((sample_rate, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Marker;
    use anyhow::anyhow;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct FakeCatalog(Vec<Track>);

    impl TrackCatalog for FakeCatalog {
        fn tracks_for_tag(&self, tag: &str) -> Result<Vec<Track>> {
            if tag == "broken" {
                return Err(anyhow!("database is locked"));
            }
            Ok(self.0.clone())
        }
    }

    struct FixedProbe {
        sample_rate: u32,
        duration: Option<i64>,
    }

    impl AudioProbe for FixedProbe {
        fn sample_rate(&self, _audio: &Path) -> Result<u32> {
            Ok(self.sample_rate)
        }

        fn duration_samples(&self, _audio: &Path, _sample_rate: u32) -> Result<i64> {
            self.duration.ok_or_else(|| anyhow!("frame count not declared"))
        }
    }

    const PROBE: FixedProbe = FixedProbe {
        sample_rate: 1000,
        duration: Some(1000),
    };

    fn annotation_text(frames: &[i64]) -> String {
        let mut text = String::from("name: test\nbeat_locations:\n  frames:\n");
        for frame in frames {
            text.push_str(&format!("  - {frame}\n"));
        }
        text.push_str("descriptors:\n  tempo_median: 2.0\n");
        text
    }

    fn track_with(temp: &TempDir, id: i64, frames: &[i64], splice: Option<i64>) -> Track {
        let annotation = temp.path().join(format!("{id}.yaml"));
        fs::write(&annotation, annotation_text(frames)).unwrap();

        let mut markers = BTreeMap::new();
        if let Some(start) = splice {
            markers.insert(DEFAULT_SPLICE_SLOT, Marker { start });
        }
        Track {
            id,
            artist: "Artist".to_string(),
            name: format!("Track {id}"),
            annotation_file: Some(annotation),
            audio_file: temp.path().join(format!("{id}.flac")),
            milliseconds: None,
            markers,
        }
    }

    fn options(temp: &TempDir) -> RepairOptions {
        RepairOptions {
            backup_dir: Some(temp.path().join("backups")),
            ..Default::default()
        }
    }

    fn stored_frames(track: &Track) -> Vec<i64> {
        let path = track.annotation_file.as_deref().unwrap();
        AnnotationDocument::load(path).unwrap().frames().unwrap()
    }

    #[test]
    fn test_linear_grid_is_extended() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 1, &[0, 100, 200, 300, 340, 360], Some(3));
        let catalog = FakeCatalog(vec![track.clone()]);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        assert_eq!(report.repaired, 1);
        match &report.tracks[0].status {
            TrackStatus::Repaired {
                tempo,
                splice_index,
                original_len,
                repaired_len,
                appended,
                backup,
            } => {
                assert_eq!(*tempo, 100.0);
                assert_eq!(*splice_index, 3);
                assert_eq!(*original_len, 6);
                assert_eq!(*repaired_len, 10);
                assert_eq!(*appended, 6);
                assert_eq!(backup.as_deref(), Some(temp.path().join("backups/1.yaml").as_path()));
            }
            other => panic!("expected repaired, got {other:?}"),
        }
        assert_eq!(stored_frames(&track), vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 900]);
    }

    #[test]
    fn test_drifting_grid_textbook_and_historical() {
        let frames = [0, 100, 202, 306, 412, 700, 800];
        let cases = [
            (MedianPolicy::Textbook, vec![0, 100, 202, 306, 409, 512, 615, 719, 823, 927]),
            (MedianPolicy::Historical, vec![0, 100, 202, 306, 411, 516, 621, 726, 831, 937]),
        ];

        for (policy, expected) in cases {
            let temp = TempDir::new().unwrap();
            let track = track_with(&temp, 2, &frames, Some(4));
            let catalog = FakeCatalog(vec![track.clone()]);
            let options = RepairOptions {
                median_policy: policy,
                ..options(&temp)
            };

            let report = RepairBatch::new(&catalog, &PROBE, options).run().unwrap();

            assert_eq!(report.repaired, 1, "{policy:?}");
            assert_eq!(stored_frames(&track), expected, "{policy:?}");
        }
    }

    #[test]
    fn test_missing_marker_is_skipped_without_backup() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 3, &[0, 100, 200], None);
        let before = fs::read_to_string(track.annotation_file.as_deref().unwrap()).unwrap();
        let catalog = FakeCatalog(vec![track.clone()]);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.tracks[0].status,
            TrackStatus::Skipped {
                kind: "missing_splice_marker".to_string(),
                reason: "no splice marker in slot 5".to_string(),
            }
        );
        assert_eq!(fs::read_to_string(track.annotation_file.as_deref().unwrap()).unwrap(), before);
        assert!(!temp.path().join("backups").exists());
    }

    #[test]
    fn test_single_beat_prefix_is_skipped() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 4, &[0, 100, 200], Some(0));
        let catalog = FakeCatalog(vec![track.clone()]);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        match &report.tracks[0].status {
            TrackStatus::Skipped { kind, .. } => assert_eq!(kind, "no_trustworthy_prefix"),
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(stored_frames(&track), vec![0, 100, 200]);
    }

    #[test]
    fn test_non_monotonic_prefix_fails_without_write() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 5, &[300, 200, 100], Some(2));
        let catalog = FakeCatalog(vec![track.clone()]);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        assert_eq!(report.failed, 1);
        match &report.tracks[0].status {
            TrackStatus::Failed { kind, .. } => assert_eq!(kind, "invalid_tempo"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(stored_frames(&track), vec![300, 200, 100]);
        assert!(!temp.path().join("backups").exists());
    }

    #[test]
    fn test_dry_run_leaves_files_alone() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 6, &[0, 100, 200, 300], Some(3));
        let catalog = FakeCatalog(vec![track.clone()]);
        let options = RepairOptions {
            dry_run: true,
            ..options(&temp)
        };

        let report = RepairBatch::new(&catalog, &PROBE, options).run().unwrap();

        assert!(report.dry_run);
        match &report.tracks[0].status {
            TrackStatus::Repaired { repaired_len, backup, .. } => {
                assert_eq!(*repaired_len, 10);
                assert_eq!(*backup, None);
            }
            other => panic!("expected repaired, got {other:?}"),
        }
        assert_eq!(stored_frames(&track), vec![0, 100, 200, 300]);
        assert!(!temp.path().join("backups").exists());
    }

    #[test]
    fn test_catalogued_length_when_probe_has_no_frame_count() {
        let temp = TempDir::new().unwrap();
        let mut track = track_with(&temp, 7, &[0, 100, 200, 300], Some(3));
        track.milliseconds = Some(600);
        let catalog = FakeCatalog(vec![track.clone()]);
        let probe = FixedProbe {
            sample_rate: 1000,
            duration: None,
        };

        let report = RepairBatch::new(&catalog, &probe, options(&temp)).run().unwrap();

        assert_eq!(report.repaired, 1);
        assert_eq!(stored_frames(&track), vec![0, 100, 200, 300, 400, 500]);
    }

    #[test]
    fn test_no_length_at_all_fails() {
        let temp = TempDir::new().unwrap();
        let track = track_with(&temp, 8, &[0, 100, 200, 300], Some(3));
        let catalog = FakeCatalog(vec![track]);
        let probe = FixedProbe {
            sample_rate: 1000,
            duration: None,
        };

        let report = RepairBatch::new(&catalog, &probe, options(&temp)).run().unwrap();

        match &report.tracks[0].status {
            TrackStatus::Failed { kind, .. } => assert_eq!(kind, "audio_probe"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_frames_fail_one_track_only() {
        let temp = TempDir::new().unwrap();
        let extreme = track_with(
            &temp,
            12,
            &[-9_000_000_000_000_000_000, 9_000_000_000_000_000_000],
            Some(1),
        );
        let good = track_with(&temp, 13, &[0, 100], Some(1));
        let catalog = FakeCatalog(vec![extreme.clone(), good.clone()]);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        assert_eq!((report.repaired, report.skipped, report.failed), (1, 0, 1));
        match &report.tracks[0].status {
            TrackStatus::Failed { kind, .. } => assert_eq!(kind, "malformed_annotation"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            stored_frames(&extreme),
            vec![-9_000_000_000_000_000_000, 9_000_000_000_000_000_000]
        );
        assert_eq!(stored_frames(&good), vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 900]);
    }

    #[test]
    fn test_batch_continues_past_bad_tracks() {
        let temp = TempDir::new().unwrap();
        let mut no_annotation = track_with(&temp, 9, &[0, 100], Some(1));
        no_annotation.annotation_file = None;
        let tracks = vec![
            no_annotation,
            track_with(&temp, 10, &[300, 200, 100], Some(2)),
            track_with(&temp, 11, &[0, 100, 200, 300], Some(3)),
        ];
        let catalog = FakeCatalog(tracks);

        let report = RepairBatch::new(&catalog, &PROBE, options(&temp)).run().unwrap();

        assert_eq!((report.repaired, report.skipped, report.failed), (1, 1, 1));
        let ids: Vec<i64> = report.tracks.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![9, 10, 11]);
        assert_eq!(report.summary(), "1 repaired, 1 skipped, 1 failed (3 tracks tagged `ends_off_beat`)");
    }

    #[test]
    fn test_catalog_failure_aborts_batch() {
        let temp = TempDir::new().unwrap();
        let catalog = FakeCatalog(Vec::new());
        let options = RepairOptions {
            tag: "broken".to_string(),
            ..options(&temp)
        };

        let err = RepairBatch::new(&catalog, &PROBE, options).run().unwrap_err();
        assert!(format!("{err:#}").contains("database is locked"));
    }

    #[test]
    fn test_report_serializes_with_outcome_tag() {
        let report = TrackReport {
            track_id: 1,
            artist: "A".to_string(),
            name: "B".to_string(),
            status: TrackStatus::Skipped {
                kind: "missing_splice_marker".to_string(),
                reason: "no splice marker in slot 5".to_string(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["outcome"], "skipped");
        assert_eq!(json["status"]["kind"], "missing_splice_marker");
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: RepairOptions = serde_json::from_str(r#"{"median_policy": "historical"}"#).unwrap();
        assert_eq!(options.median_policy, MedianPolicy::Historical);
        assert_eq!(options.tag, DEFAULT_REPAIR_TAG);
        assert_eq!(options.smoothing_sweeps, DEFAULT_SMOOTHING_SWEEPS);
    }
}
