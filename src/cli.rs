//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `beatfix` binary.
//!
//! ## Commands
//!
//! - `init-db`: Create the catalog tables
//! - `add`: Register an audio file and its annotation
//! - `tag`: Tag a work for repair
//! - `mark`: Set the splice marker of a work
//! - `list`: Show tagged works and their splice marker
//! - `repair`: Repair the beat grid of every tagged work
//! - `completion`: Print shell completions
//!
//! ## Examples
//!
//! ```bash
//! beatfix add ~/Music/hey_ho.flac --artist "Dub Syndicate" --name "Hey Ho" \
//!     --annotation ~/annotation/1.yaml
//! beatfix tag 1
//! beatfix mark 1 57
//! beatfix repair --dry-run
//! ```

use crate::tempo::MedianPolicy;
use crate::track::MarkerUnit;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "beatfix")]
#[command(about = "beatfix: rebuild beat grids that fall apart partway through a track")]
#[command(version)]
pub struct Args {
    /// Catalog database (default: <data dir>/beatfix/library.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Config file (default: <data dir>/beatfix/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the catalog tables
    ///
    /// Safe to run on an existing catalog; only missing tables are created.
    InitDb,

    /// Register an audio file as a new work
    Add {
        /// Audio file of the work
        #[arg(value_hint = clap::ValueHint::FilePath)]
        audio: PathBuf,

        #[arg(long, default_value = "")]
        artist: String,

        /// Work name (default: audio file stem)
        #[arg(long)]
        name: Option<String>,

        /// YAML annotation holding the beat grid
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        annotation: Option<PathBuf>,

        /// Catalogued length, used when the audio header has no frame count
        #[arg(long)]
        milliseconds: Option<i64>,
    },

    /// Tag a work for repair
    Tag {
        work_id: i64,

        #[arg(long)]
        tag: Option<String>,
    },

    /// Set the splice marker of a work
    ///
    /// START is the index of the last good beat, or a sample frame when the
    /// repair runs with `--marker-unit frame`.
    Mark {
        work_id: i64,

        #[arg(allow_negative_numbers = true)]
        start: i64,

        /// Marker slot (default: 5, shown as 6 in the player)
        #[arg(long)]
        slot: Option<i64>,
    },

    /// List works carrying the repair tag
    List {
        #[arg(long)]
        tag: Option<String>,
    },

    /// Repair the beat grid of every tagged work
    ///
    /// Each annotation is copied to the backup directory before it is
    /// rewritten. Works that cannot be repaired are reported and left alone.
    Repair {
        /// Tag selecting the works to repair (default: ends_off_beat)
        #[arg(long)]
        tag: Option<String>,

        /// Slot of the splice marker (default: 5)
        #[arg(long)]
        marker_slot: Option<i64>,

        /// How the splice marker's start is interpreted
        #[arg(long, value_enum)]
        marker_unit: Option<MarkerUnit>,

        /// Median taken for an even number of beat intervals
        #[arg(long, value_enum)]
        median: Option<MedianPolicy>,

        /// Smoothing sweeps over the seam (default: 10)
        #[arg(long)]
        sweeps: Option<usize>,

        /// Where annotation backups go
        #[arg(long, value_hint = clap::ValueHint::DirPath)]
        backup_dir: Option<PathBuf>,

        /// Compute and report without touching any file
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_repair_flags() {
        let args = Args::parse_from([
            "beatfix",
            "--db",
            "/tmp/lib.db",
            "repair",
            "--marker-unit",
            "frame",
            "--median",
            "historical",
            "--sweeps",
            "4",
            "--dry-run",
        ]);

        assert_eq!(args.db, Some(PathBuf::from("/tmp/lib.db")));
        match args.command {
            Command::Repair {
                marker_unit,
                median,
                sweeps,
                dry_run,
                json,
                ..
            } => {
                assert_eq!(marker_unit, Some(MarkerUnit::Frame));
                assert_eq!(median, Some(MedianPolicy::Historical));
                assert_eq!(sweeps, Some(4));
                assert!(dry_run);
                assert!(!json);
            }
            other => panic!("expected repair, got {other:?}"),
        }
    }

    #[test]
    fn test_global_db_after_subcommand() {
        let args = Args::parse_from(["beatfix", "list", "--db", "x.db"]);
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
    }

    #[test]
    fn test_mark_accepts_negative_start() {
        let args = Args::parse_from(["beatfix", "mark", "3", "-1"]);
        match args.command {
            Command::Mark { work_id, start, slot } => {
                assert_eq!((work_id, start, slot), (3, -1, None));
            }
            other => panic!("expected mark, got {other:?}"),
        }
    }
}
