//! # beatfix
//!
//! Batch repair of beat grids that stop following the music partway through
//! a track.
//!
//! ## Usage
//!
//! ```bash
//! # Create the catalog and register a track
//! beatfix init-db
//! beatfix add ~/Music/hey_ho.flac --artist "Dub Syndicate" --annotation ~/annotation/1.yaml
//!
//! # Mark where the grid goes bad and queue it for repair
//! beatfix mark 1 57
//! beatfix tag 1
//!
//! # See what would change, then do it
//! beatfix repair --dry-run
//! beatfix repair
//! ```

use anyhow::{Context, Result};
use beatfix::config::{self, RuntimeConfig};
use beatfix::db::{self, NewTrack, SqliteCatalog, TrackCatalog};
use beatfix::probe::SymphoniaProbe;
use beatfix::repair::{BatchReport, RepairBatch, TrackStatus};
use beatfix::{cli, completion};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::path::PathBuf;

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG` and defaults to `info`:
/// - `RUST_LOG=debug beatfix repair` - Per-track tempo and splice details
/// - `RUST_LOG=beatfix::annotation=trace beatfix repair` - Module-specific logging
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();

    let config = RuntimeConfig::load(args.config.as_deref())?;
    // only commands that use the catalog resolve it
    let catalog_path = || -> Result<PathBuf> {
        let db_path = match &args.db {
            Some(db_path) => config::absolute(db_path)?,
            None => config.catalog_path()?,
        };
        debug!("Using catalog {}", db_path.display());
        Ok(db_path)
    };

    match args.command {
        cli::Command::InitDb => {
            let db_path = catalog_path()?;
            let catalog = SqliteCatalog::open(&db_path)?;
            db::init_schema(catalog.connection())?;
            catalog.close()?;
            println!("Catalog ready at {}", db_path.display());
        }
        cli::Command::Add { audio, artist, name, annotation, milliseconds } => {
            let audio = config::absolute(&audio)?;
            let annotation = annotation.as_deref().map(config::absolute).transpose()?;
            let name = match name {
                Some(name) => name,
                None => audio
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .context("Audio path has no file name; pass --name")?,
            };

            let mut catalog = SqliteCatalog::open(&catalog_path()?)?;
            let work_id = db::add_track(
                catalog.connection_mut(),
                &NewTrack {
                    artist: &artist,
                    name: &name,
                    audio_file: &audio,
                    milliseconds,
                    annotation_file: annotation.as_deref(),
                },
            )?;
            catalog.close()?;
            println!("Added work {work_id}: {name}");
        }
        cli::Command::Tag { work_id, tag } => {
            let tag = tag.unwrap_or_else(|| config.repair.tag.clone());
            let mut catalog = SqliteCatalog::open(&catalog_path()?)?;
            db::tag_track(catalog.connection_mut(), work_id, &tag)?;
            catalog.close()?;
            info!("Tagged work {work_id} with `{tag}`");
        }
        cli::Command::Mark { work_id, start, slot } => {
            let slot = slot.unwrap_or(config.repair.marker_slot);
            let catalog = SqliteCatalog::open(&catalog_path()?)?;
            db::set_marker(catalog.connection(), work_id, slot, start)?;
            catalog.close()?;
            info!("Marker {slot} of work {work_id} set to {start}");
        }
        cli::Command::List { tag } => {
            let tag = tag.unwrap_or_else(|| config.repair.tag.clone());
            let slot = config.repair.marker_slot;
            let catalog = SqliteCatalog::open(&catalog_path()?)?;
            let tracks = catalog.tracks_for_tag(&tag)?;
            catalog.close()?;

            for track in &tracks {
                let splice = track
                    .markers
                    .get(&slot)
                    .map_or_else(|| "-".to_string(), |marker| marker.start.to_string());
                let annotation = track
                    .annotation_file
                    .as_deref()
                    .map_or_else(|| "(no annotation)".to_string(), |path| path.display().to_string());
                println!("{:>6}  {:<40}  splice {:>8}  {annotation}", track.id, track.display_name(), splice);
            }
            println!("{} works tagged `{tag}`", tracks.len());
        }
        cli::Command::Repair {
            tag,
            marker_slot,
            marker_unit,
            median,
            sweeps,
            backup_dir,
            dry_run,
            json,
        } => {
            let mut options = config.repair_options();
            if let Some(tag) = tag {
                options.tag = tag;
            }
            if let Some(slot) = marker_slot {
                options.marker_slot = slot;
            }
            if let Some(unit) = marker_unit {
                options.marker_unit = unit;
            }
            if let Some(policy) = median {
                options.median_policy = policy;
            }
            if let Some(sweeps) = sweeps {
                options.smoothing_sweeps = sweeps;
            }
            if let Some(dir) = backup_dir {
                options.backup_dir = Some(config::absolute(&dir)?);
            }
            options.dry_run |= dry_run;

            let catalog = SqliteCatalog::open(&catalog_path()?)?;
            let probe = SymphoniaProbe::new();
            let report = RepairBatch::new(&catalog, &probe, options).run()?;
            catalog.close()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if report.failed > 0 {
                std::process::exit(2);
            }
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(shell, &mut cmd);
        }
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    for track in &report.tracks {
        let title = if track.artist.is_empty() {
            track.name.clone()
        } else {
            format!("{} - {}", track.artist, track.name)
        };
        match &track.status {
            TrackStatus::Repaired {
                tempo,
                splice_index,
                original_len,
                repaired_len,
                backup,
                ..
            } => {
                let backup = backup
                    .as_deref()
                    .map(|path| format!(", backup {}", path.display()))
                    .unwrap_or_default();
                println!(
                    "repaired  #{} {title}: tempo {tempo:.2}, splice at beat {splice_index}, {original_len} -> {repaired_len} beats{backup}",
                    track.track_id
                );
            }
            TrackStatus::Skipped { reason, .. } => println!("skipped   #{} {title}: {reason}", track.track_id),
            TrackStatus::Failed { reason, .. } => println!("failed    #{} {title}: {reason}", track.track_id),
        }
    }
    println!("{}", report.summary());
}
