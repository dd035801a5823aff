//! # Configuration Module
//!
//! Data directory setup and the optional config file.
//!
//! ## Data Storage
//!
//! The catalog and config file live in the platform data directory:
//! - Linux: `~/.local/share/beatfix/`
//! - macOS: `~/Library/Application Support/beatfix/`
//! - Windows: `%APPDATA%\beatfix\`
//!
//! Annotation backups go to `beatfix-backups` in the system temp directory
//! unless configured otherwise.
//!
//! ## Config File
//!
//! `config.json` in the data directory, every field optional:
//!
//! ```json
//! {
//!   "db_path": "/srv/music/library.db",
//!   "backup_dir": "/srv/music/annotation-backups",
//!   "repair": { "marker_slot": 5, "median_policy": "historical" }
//! }
//! ```

use crate::repair::RepairOptions;
use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "beatfix";
const DB_FILE: &str = "library.db";
const CONFIG_FILE: &str = "config.json";
const BACKUP_DIR: &str = "beatfix-backups";

/// Returns the beatfix data directory, creating it if needed.
///
/// # Errors
///
/// Fails when the platform has no data directory or it cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Pass --db to choose a catalog explicitly."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Default catalog location, `<data dir>/beatfix/library.db`.
///
/// ```no_run
/// use beatfix::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Catalog location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Where the config file is looked up when none is given. Nothing is created.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

#[must_use]
pub fn default_backup_dir() -> PathBuf {
    std::env::temp_dir().join(BACKUP_DIR)
}

/// Resolve a user supplied path against the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Invalid path {}", path.display()))?
        .into_owned())
}

/// Settings for one invocation, after the config file and CLI are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the catalog database. `None` means [`get_db_path`].
    pub db_path: Option<PathBuf>,
    /// Where annotation backups go
    pub backup_dir: PathBuf,
    pub repair: RepairOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            backup_dir: default_backup_dir(),
            repair: RepairOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Read `path`, or the default config file when `path` is `None`.
    ///
    /// A missing default config file yields the defaults; a missing file that
    /// was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (absolute(path)?, true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => {
                    log::debug!("No data directory, using default config");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            if required {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        // relative paths in the file are relative to the file
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(db_path) = &config.db_path {
            config.db_path = Some(resolve_from(base, db_path)?);
        }
        config.backup_dir = resolve_from(base, &config.backup_dir)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// The configured catalog, or the one in the data directory.
    ///
    /// The data directory is only touched when no catalog was configured.
    pub fn catalog_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(db_path) => Ok(db_path.clone()),
            None => get_db_path(),
        }
    }

    /// Repair options with the backup directory filled in.
    #[must_use]
    pub fn repair_options(&self) -> RepairOptions {
        let mut options = self.repair.clone();
        if options.backup_dir.is_none() {
            options.backup_dir = Some(self.backup_dir.clone());
        }
        options
    }
}

fn resolve_from(base: &Path, path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize_from(base)
        .with_context(|| format!("Invalid path {}", path.display()))?
        .into_owned())
}
