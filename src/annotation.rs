//! Annotation sidecar files.
//!
//! An annotation is a YAML document with derived data for one track. The beat
//! grid lives under `beat_locations.frames` as a list of sample frames:
//!
//! ```yaml
//! name: Hey Ho
//! beat_locations:
//!   frames:
//!   - 0
//!   - 22050
//! ```
//!
//! Reading goes through `serde_yaml`. Writing does not re-emit the document:
//! only the text of the `frames` value is replaced, so everything else in the
//! file (key order, comments, float formatting, other sections) stays byte for
//! byte what it was.

use crate::error::RepairError;
use serde_yaml::Value;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

const SECTION_KEY: &str = "beat_locations";
const FRAMES_KEY: &str = "frames";

/// An annotation file as read from disk.
#[derive(Debug, Clone)]
pub struct AnnotationDocument {
    path: PathBuf,
    text: String,
}

impl AnnotationDocument {
    pub fn load(path: &Path) -> Result<Self, RepairError> {
        let text = fs::read_to_string(path).map_err(|e| RepairError::io_at("read", path, e))?;
        Ok(Self::from_text(path, text))
    }

    pub fn from_text(path: &Path, text: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The beat grid stored in the document.
    ///
    /// Float entries are truncated to whole frames. Fewer than two entries
    /// count as missing data: there is no grid to repair.
    pub fn frames(&self) -> Result<Vec<i64>, RepairError> {
        let frames = parse_frames(&self.text)?;
        if frames.len() < 2 {
            return Err(RepairError::MissingAnnotationData(format!(
                "`{SECTION_KEY}.{FRAMES_KEY}` has {} entries",
                frames.len()
            )));
        }
        Ok(frames)
    }

    /// Document text with the `frames` value replaced by `frames`.
    ///
    /// The original layout of the value is kept: a block sequence stays a
    /// block sequence at the same indentation, a flow sequence stays on its
    /// line. The result is parsed again and checked before it is returned.
    pub fn with_frames(&self, frames: &[i64]) -> Result<String, RepairError> {
        let splice = locate_frames(&self.text)?;

        let replacement = match splice.style {
            ValueStyle::Flow => {
                let items: Vec<String> = frames.iter().map(i64::to_string).collect();
                format!("[{}]", items.join(", "))
            }
            ValueStyle::Block { ref item_prefix } => {
                let mut out = String::with_capacity(frames.len() * (item_prefix.len() + 12));
                for frame in frames {
                    out.push_str(item_prefix);
                    out.push_str(&frame.to_string());
                    out.push_str(splice.newline);
                }
                if !splice.ends_with_newline && !out.is_empty() {
                    out.truncate(out.len() - splice.newline.len());
                }
                out
            }
        };

        let mut updated = String::with_capacity(self.text.len() + replacement.len());
        updated.push_str(&self.text[..splice.span.start]);
        updated.push_str(&replacement);
        updated.push_str(&self.text[splice.span.end..]);

        if parse_frames(&updated)? != frames {
            return Err(RepairError::MalformedAnnotation(format!(
                "rewritten `{FRAMES_KEY}` of {} does not read back",
                self.path.display()
            )));
        }
        Ok(updated)
    }

    /// Back up the file on disk, then replace its beat grid with `frames`.
    ///
    /// Nothing is written unless the new text was built and verified and the
    /// backup copy is complete. The write itself goes to a temporary file next
    /// to the original that is then renamed over it.
    pub fn write_frames(&self, frames: &[i64], backup_dir: &Path) -> Result<Backup, RepairError> {
        let updated = self.with_frames(frames)?;
        let backup = Backup::create(&self.path, backup_dir)?;
        replace_contents(&self.path, &updated)?;
        log::debug!(
            "Rewrote {} ({} frames), backup at {}",
            self.path.display(),
            frames.len(),
            backup.path().display()
        );
        Ok(backup)
    }
}

/// Unmodified copy of an annotation file, taken right before it is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    path: PathBuf,
}

impl Backup {
    /// Copy `original` into `dir` under its own file name.
    ///
    /// If that name is taken by an earlier backup, `<name>.1`, `<name>.2`, ...
    /// are tried in order. The target is created exclusively, so an existing
    /// backup is never overwritten.
    pub fn create(original: &Path, dir: &Path) -> Result<Self, RepairError> {
        fs::create_dir_all(dir).map_err(|e| RepairError::io_at("create backup dir", dir, e))?;

        let file_name = original.file_name().ok_or_else(|| {
            RepairError::io_at(
                "back up",
                original,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;

        let mut source = File::open(original).map_err(|e| RepairError::io_at("open", original, e))?;

        let mut attempt: u32 = 0;
        loop {
            let candidate = if attempt == 0 {
                dir.join(file_name)
            } else {
                let mut numbered = OsString::from(file_name);
                numbered.push(format!(".{attempt}"));
                dir.join(numbered)
            };

            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut target) => {
                    let copied = io::copy(&mut source, &mut target).and_then(|_| target.sync_all());
                    if let Err(e) = copied {
                        drop(target);
                        // a half-written backup is worse than none
                        if let Err(cleanup) = fs::remove_file(&candidate) {
                            log::warn!("Could not remove partial backup {}: {cleanup}", candidate.display());
                        }
                        return Err(RepairError::io_at("write backup", &candidate, e));
                    }
                    log::info!("Backed up {} to {}", original.display(), candidate.display());
                    return Ok(Self { path: candidate });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(RepairError::io_at("create backup", &candidate, e)),
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

fn replace_contents(path: &Path, contents: &str) -> Result<(), RepairError> {
    // a symlinked annotation keeps its link; the file it points at is replaced
    let target = fs::canonicalize(path).map_err(|e| RepairError::io_at("resolve", path, e))?;
    let path = target.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| RepairError::io_at("create temporary file in", dir, e))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| RepairError::io_at("write temporary file for", path, e))?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions())
            .map_err(|e| RepairError::io_at("copy permissions to", tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| RepairError::io_at("replace", path, e.error))?;
    Ok(())
}

fn parse_frames(text: &str) -> Result<Vec<i64>, RepairError> {
    let doc: Value =
        serde_yaml::from_str(text).map_err(|e| RepairError::MalformedAnnotation(e.to_string()))?;

    let section = doc
        .get(SECTION_KEY)
        .ok_or_else(|| RepairError::MissingAnnotationData(format!("no `{SECTION_KEY}` section")))?;
    let entries = section
        .get(FRAMES_KEY)
        .and_then(Value::as_sequence)
        .ok_or_else(|| {
            RepairError::MissingAnnotationData(format!("no `{SECTION_KEY}.{FRAMES_KEY}` list"))
        })?;

    entries
        .iter()
        .map(|entry| {
            entry
                .as_i64()
                .or_else(|| entry.as_f64().map(|frame| frame.trunc() as i64))
                .ok_or_else(|| {
                    RepairError::MissingAnnotationData(format!("non-numeric frame `{entry:?}`"))
                })
        })
        .collect()
}

/// Where the `frames` value sits in the document text.
#[derive(Debug)]
struct FramesSplice {
    span: Range<usize>,
    style: ValueStyle,
    newline: &'static str,
    ends_with_newline: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum ValueStyle {
    /// `frames: [0, 100, ...]`
    Flow,
    /// One `- n` line per frame, each starting with `item_prefix`.
    Block { item_prefix: String },
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    /// Byte offset of the first character.
    start: usize,
    /// Byte offset just past the line terminator.
    end: usize,
    /// Content without the terminator.
    content: &'a str,
}

impl Line<'_> {
    fn indent(&self) -> usize {
        self.content.len() - self.content.trim_start_matches(' ').len()
    }

    fn is_blank_or_comment(&self) -> bool {
        let trimmed = self.content.trim();
        trimmed.is_empty() || trimmed.starts_with('#')
    }

    fn newline(&self, text: &str) -> &'static str {
        if text[self.start..self.end].ends_with("\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .map(|raw| {
            let content = raw.strip_suffix('\n').unwrap_or(raw);
            let content = content.strip_suffix('\r').unwrap_or(content);
            let line = Line {
                start: offset,
                end: offset + raw.len(),
                content,
            };
            offset += raw.len();
            line
        })
        .collect()
}

/// Text after `key:` if `content` is that mapping key, else `None`.
fn value_after_key<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    let rest = content.trim_start().strip_prefix(key)?.strip_prefix(':')?;
    if rest.is_empty() || rest.starts_with([' ', '\t']) {
        Some(rest)
    } else {
        None
    }
}

fn strip_comment(value: &str) -> &str {
    match value.find(" #") {
        Some(at) => &value[..at],
        None => value,
    }
    .trim()
}

fn locate_frames(text: &str) -> Result<FramesSplice, RepairError> {
    let unsupported = |why: &str| {
        RepairError::MalformedAnnotation(format!("cannot rewrite `{SECTION_KEY}.{FRAMES_KEY}`: {why}"))
    };
    let lines = split_lines(text);

    let section = lines
        .iter()
        .position(|line| line.indent() == 0 && value_after_key(line.content, SECTION_KEY).is_some())
        .ok_or_else(|| unsupported("section not found at top level"))?;
    let section_value = value_after_key(lines[section].content, SECTION_KEY).unwrap_or_default();
    if !strip_comment(section_value).is_empty() {
        return Err(unsupported("section is not a block mapping"));
    }

    let body: Vec<(usize, &Line)> = lines
        .iter()
        .enumerate()
        .skip(section + 1)
        .take_while(|(_, line)| line.is_blank_or_comment() || line.indent() > 0)
        .collect();
    let child_indent = body
        .iter()
        .find(|(_, line)| !line.is_blank_or_comment())
        .map(|(_, line)| line.indent())
        .ok_or_else(|| unsupported("section is empty"))?;

    let (key_index, key_line) = body
        .iter()
        .copied()
        .find(|(_, line)| {
            line.indent() == child_indent && value_after_key(line.content, FRAMES_KEY).is_some()
        })
        .ok_or_else(|| unsupported("key not found in section"))?;
    let newline = key_line.newline(text);
    let inline_value = value_after_key(key_line.content, FRAMES_KEY).unwrap_or_default();

    if !strip_comment(inline_value).is_empty() {
        if !strip_comment(inline_value).starts_with('[') {
            return Err(unsupported("value is neither a block nor a flow sequence"));
        }
        let value_offset = key_line.start + (key_line.content.len() - inline_value.len());
        let open = value_offset
            + text[value_offset..]
                .find('[')
                .ok_or_else(|| unsupported("unterminated flow sequence"))?;
        let close = open
            + text[open..]
                .find(']')
                .ok_or_else(|| unsupported("unterminated flow sequence"))?;
        return Ok(FramesSplice {
            span: open..close + 1,
            style: ValueStyle::Flow,
            newline,
            ends_with_newline: true,
        });
    }

    let mut last_item: Option<Line> = None;
    let mut item_prefix: Option<String> = None;
    for line in &lines[key_index + 1..] {
        if line.is_blank_or_comment() {
            continue;
        }
        let indent = line.indent();
        let is_item = line.content.trim_start().starts_with('-');
        if indent > child_indent || (indent == child_indent && is_item) {
            if item_prefix.is_none() && is_item {
                item_prefix = Some(format!("{}- ", &line.content[..indent]));
            }
            last_item = Some(*line);
        } else {
            break;
        }
    }

    let (Some(last_item), Some(item_prefix)) = (last_item, item_prefix) else {
        return Err(unsupported("value is not a block sequence"));
    };
    Ok(FramesSplice {
        span: key_line.end..last_item.end,
        style: ValueStyle::Block { item_prefix },
        newline,
        ends_with_newline: last_item.end > last_item.start + last_item.content.len(),
    })
}
