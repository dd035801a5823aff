//! # Catalog Module
//!
//! SQLite catalog of audio works, their files, tags and markers. The repair
//! batch only reads from it through [`TrackCatalog`]; the helper functions
//! below are what the CLI uses to populate it.
//!
//! ## Schema
//!
//! | Table | Columns |
//! |---|---|
//! | `artists` | `id`, `name` |
//! | `audio_files` | `id`, `location`, `milliseconds` |
//! | `audio_works` | `id`, `audio_file_id`, `name` |
//! | `artist_audio_works` | `artist_id`, `audio_work_id` |
//! | `annotation_files` | `id`, `audio_work_id`, `location` |
//! | `tags` | `id`, `name` |
//! | `audio_work_tags` | `audio_work_id`, `tag_id` |
//! | `work_markers` | `audio_work_id`, `slot`, `start` |

use crate::track::{Marker, Track};
use anyhow::{bail, Context, Result};
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where the batch gets its tracks from.
pub trait TrackCatalog {
    /// All tracks carrying `tag`, ordered by id.
    fn tracks_for_tag(&self, tag: &str) -> Result<Vec<Track>>;
}

/// What [`add_track`] needs to register a new audio work.
#[derive(Debug, Clone)]
pub struct NewTrack<'a> {
    pub artist: &'a str,
    pub name: &'a str,
    pub audio_file: &'a Path,
    pub milliseconds: Option<i64>,
    pub annotation_file: Option<&'a Path>,
}

/// A catalog database opened for one batch run.
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open catalog at {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory catalog")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Close the connection, reporting anything SQLite still had to flush.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| err)
            .context("Failed to close catalog")
    }
}

impl TrackCatalog for SqliteCatalog {
    fn tracks_for_tag(&self, tag: &str) -> Result<Vec<Track>> {
        tracks_for_tag(&self.conn, tag)
    }
}

/// Create all catalog tables that do not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS artists (
            id   INTEGER PRIMARY KEY,
            name TEXT    NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS audio_files (
            id           INTEGER PRIMARY KEY,
            location     TEXT    NOT NULL UNIQUE,
            milliseconds INTEGER
        );
        CREATE TABLE IF NOT EXISTS audio_works (
            id            INTEGER PRIMARY KEY,
            audio_file_id INTEGER NOT NULL REFERENCES audio_files(id),
            name          TEXT    NOT NULL
        );
        CREATE TABLE IF NOT EXISTS artist_audio_works (
            artist_id     INTEGER NOT NULL REFERENCES artists(id),
            audio_work_id INTEGER NOT NULL REFERENCES audio_works(id),
            PRIMARY KEY (artist_id, audio_work_id)
        );
        CREATE TABLE IF NOT EXISTS annotation_files (
            id            INTEGER PRIMARY KEY,
            audio_work_id INTEGER NOT NULL UNIQUE REFERENCES audio_works(id),
            location      TEXT    NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tags (
            id   INTEGER PRIMARY KEY,
            name TEXT    NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS audio_work_tags (
            audio_work_id INTEGER NOT NULL REFERENCES audio_works(id),
            tag_id        INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (audio_work_id, tag_id)
        );
        CREATE TABLE IF NOT EXISTS work_markers (
            audio_work_id INTEGER NOT NULL REFERENCES audio_works(id),
            slot          INTEGER NOT NULL,
            start         INTEGER NOT NULL,
            PRIMARY KEY (audio_work_id, slot)
        );
        COMMIT;",
    )
    .context("Failed to create catalog schema")?;

    debug!("Catalog schema ready");
    Ok(())
}

/// Register an audio work with its file, artist and optional annotation.
/// Returns the id of the new work.
pub fn add_track(conn: &mut Connection, track: &NewTrack<'_>) -> Result<i64> {
    let tx = conn.transaction()?;

    let work_id = {
        tx.execute("INSERT OR IGNORE INTO artists (name) VALUES (?1)", [track.artist])
            .with_context(|| format!("Failed to insert artist `{}`", track.artist))?;
        let artist_id: i64 = tx.query_row(
            "SELECT id FROM artists WHERE name = ?1",
            [track.artist],
            |row| row.get(0),
        )?;

        let audio_location = track.audio_file.to_string_lossy();
        tx.execute(
            "INSERT INTO audio_files (location, milliseconds) VALUES (?1, ?2)",
            params![audio_location, track.milliseconds],
        )
        .with_context(|| format!("Failed to insert audio file {audio_location}"))?;
        let audio_file_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO audio_works (audio_file_id, name) VALUES (?1, ?2)",
            params![audio_file_id, track.name],
        )
        .with_context(|| format!("Failed to insert audio work `{}`", track.name))?;
        let work_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO artist_audio_works (artist_id, audio_work_id) VALUES (?1, ?2)",
            params![artist_id, work_id],
        )?;

        if let Some(annotation) = track.annotation_file {
            tx.execute(
                "INSERT INTO annotation_files (audio_work_id, location) VALUES (?1, ?2)",
                params![work_id, annotation.to_string_lossy()],
            )
            .with_context(|| format!("Failed to insert annotation for work {work_id}"))?;
        }
        work_id
    };

    tx.commit().context("Committing new track failed")?;
    debug!("Added work {work_id}: {} - {}", track.artist, track.name);
    Ok(work_id)
}

fn ensure_work_exists(conn: &Connection, work_id: i64) -> Result<()> {
    let found = conn
        .query_row("SELECT 1 FROM audio_works WHERE id = ?1", [work_id], |_| Ok(()))
        .optional()
        .with_context(|| format!("Failed to look up work {work_id}"))?;
    if found.is_none() {
        bail!("No audio work with id {work_id}");
    }
    Ok(())
}

/// Attach `tag` to a work, creating the tag if needed. Tagging twice is a no-op.
pub fn tag_track(conn: &mut Connection, work_id: i64, tag: &str) -> Result<()> {
    ensure_work_exists(conn, work_id)?;
    let tx = conn.transaction()?;
    tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [tag])
        .with_context(|| format!("Failed to insert tag `{tag}`"))?;
    tx.execute(
        "INSERT OR IGNORE INTO audio_work_tags (audio_work_id, tag_id)
         SELECT ?1, id FROM tags WHERE name = ?2",
        params![work_id, tag],
    )
    .with_context(|| format!("Failed to tag work {work_id} with `{tag}`"))?;
    tx.commit().context("Committing tag failed")?;
    Ok(())
}

/// Set or move the marker in `slot` of a work.
pub fn set_marker(conn: &Connection, work_id: i64, slot: i64, start: i64) -> Result<()> {
    ensure_work_exists(conn, work_id)?;
    conn.execute(
        "INSERT INTO work_markers (audio_work_id, slot, start) VALUES (?1, ?2, ?3)
         ON CONFLICT (audio_work_id, slot) DO UPDATE SET start = excluded.start",
        params![work_id, slot, start],
    )
    .with_context(|| format!("Failed to set marker {slot} on work {work_id}"))?;
    Ok(())
}

/// All works tagged with `tag`, with file locations and markers filled in.
pub fn tracks_for_tag(conn: &Connection, tag: &str) -> Result<Vec<Track>> {
    let mut stmt = conn
        .prepare(
            "SELECT w.id,
                    COALESCE(GROUP_CONCAT(ar.name, ', '), ''),
                    w.name,
                    an.location,
                    f.location,
                    f.milliseconds
             FROM audio_works w
             JOIN audio_work_tags wt ON wt.audio_work_id = w.id
             JOIN tags t ON t.id = wt.tag_id
             JOIN audio_files f ON f.id = w.audio_file_id
             LEFT JOIN annotation_files an ON an.audio_work_id = w.id
             LEFT JOIN artist_audio_works aw ON aw.audio_work_id = w.id
             LEFT JOIN artists ar ON ar.id = aw.artist_id
             WHERE t.name = ?1
             GROUP BY w.id
             ORDER BY w.id",
        )
        .context("Invalid SQL statement when selecting tagged works")?;

    let rows = stmt
        .query_map([tag], |row| {
            Ok(Track {
                id: row.get(0)?,
                artist: row.get(1)?,
                name: row.get(2)?,
                annotation_file: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
                audio_file: PathBuf::from(row.get::<_, String>(4)?),
                milliseconds: row.get(5)?,
                markers: BTreeMap::new(),
            })
        })
        .with_context(|| format!("Cannot query works tagged `{tag}`"))?;

    let mut tracks = Vec::new();
    for row in rows {
        tracks.push(row.context("Queried work could not be read")?);
    }

    let mut markers = conn.prepare("SELECT slot, start FROM work_markers WHERE audio_work_id = ?1")?;
    for track in &mut tracks {
        let slots = markers.query_map([track.id], |row| {
            Ok((row.get::<_, i64>(0)?, Marker { start: row.get(1)? }))
        })?;
        for slot in slots {
            let (slot, marker) = slot.context("Queried marker could not be read")?;
            track.markers.insert(slot, marker);
        }
    }

    trace!("{} works tagged `{tag}`", tracks.len());
    Ok(tracks)
}
