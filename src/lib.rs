//! Beat grid repair for a tagged music catalog.
//!
//! Beat trackers sometimes lose the beat partway through a track and stop
//! producing usable positions. Given a marker on the last beat that can be
//! trusted, `beatfix` measures the tempo of the good part, extends the grid to
//! the end of the track at that tempo, and smooths the join so cue and loop
//! points do not jump.
//!
//! Core modules:
//! - [`tempo`] - Median beat interval of the trustworthy prefix
//! - [`grid`] - Extrapolation and seam smoothing
//! - [`annotation`] - Reading and rewriting YAML annotation files, with backups
//! - [`repair`] - The batch driver and its report
//!
//! ### Supporting Modules
//!
//! - [`db`] - SQLite catalog and the [`db::TrackCatalog`] seam
//! - [`probe`] - Sample rate and length of audio files
//! - [`track`] - Catalog records and splice markers
//! - [`error`] - Per-track error kinds
//! - [`config`] - Data directory and config file
//! - [`cli`] / [`completion`] - Command line
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use beatfix::db::SqliteCatalog;
//! use beatfix::probe::SymphoniaProbe;
//! use beatfix::repair::{RepairBatch, RepairOptions};
//!
//! let catalog = SqliteCatalog::open(&beatfix::config::get_db_path()?)?;
//! let probe = SymphoniaProbe::new();
//!
//! let report = RepairBatch::new(&catalog, &probe, RepairOptions::default()).run()?;
//! println!("{}", report.summary());
//! catalog.close()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Working on a grid directly
//!
//! ```
//! use beatfix::grid::{extrapolate, smooth_seam, DEFAULT_SMOOTHING_SWEEPS};
//! use beatfix::tempo::{estimate_tempo, MedianPolicy};
//!
//! let mut grid = vec![0, 100, 202, 306, 412];
//! let tempo = estimate_tempo(&grid, MedianPolicy::Textbook)?;
//! extrapolate(&mut grid, tempo, 1000)?;
//! smooth_seam(&mut grid, 4, DEFAULT_SMOOTHING_SWEEPS);
//!
//! assert_eq!(grid, [0, 100, 202, 306, 409, 512, 615, 719, 823, 927]);
//! # Ok::<(), beatfix::error::RepairError>(())
//! ```

pub mod annotation;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod grid;
pub mod probe;
pub mod repair;
pub mod tempo;
pub mod track;
