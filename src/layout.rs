//! Dataset directory layout: `root/speaker_id/chapter_id/unit_id.<ext>`.
//!
//! Every stage walks the same two-level hierarchy in lexicographic order and
//! derives output paths by swapping the root and the extension, so a unit's
//! audio, transcript, phoneme and token artifacts share one file stem.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{error::UnitError, report::BatchReport};

/// Chunk audio.
pub const WAV_EXT: &str = "wav";
/// Transcript.
pub const TXT_EXT: &str = "txt";
/// Space-joined phoneme tokens, one line.
pub const PHONE_EXT: &str = "phone";
/// Codec token matrix.
pub const NPY_EXT: &str = "npy";

/// Half-open slice `[start, end)` of the sorted speaker list, used to shard a
/// batch across parallel invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub start: usize,
    pub end: usize,
}

impl ShardRange {
    pub const ALL: Self = Self { start: 0, end: usize::MAX };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let end = self.end.min(items.len());
        let start = self.start.min(end);
        items.into_iter().skip(start).take(end - start).collect()
    }
}

impl Default for ShardRange {
    fn default() -> Self {
        Self { start: 0, end: 100 }
    }
}

/// One non-empty chapter directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub speaker: String,
    pub chapter: String,
    pub path: PathBuf,
}

impl fmt::Display for Chapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.speaker, self.chapter)
    }
}

impl Chapter {
    /// The matching chapter directory under another root.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.speaker).join(&self.chapter)
    }

    pub fn unit(&self, uid: &str) -> UnitKey {
        UnitKey {
            speaker: self.speaker.clone(),
            chapter: self.chapter.clone(),
            uid: uid.to_string(),
        }
    }
}

/// Identity shared by every artifact of one unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    pub speaker: String,
    pub chapter: String,
    pub uid: String,
}

impl UnitKey {
    /// `root/speaker/chapter/uid.ext`
    pub fn path(&self, root: &Path, ext: &str) -> PathBuf {
        root.join(&self.speaker)
            .join(&self.chapter)
            .join(format!("{}.{}", self.uid, ext))
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.speaker, self.chapter, self.uid)
    }
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("Cannot list {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() != want_dirs {
            continue;
        }
        out.push((entry.file_name().to_string_lossy().into_owned(), path));
    }
    out.sort();
    Ok(out)
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(dir).with_context(|| format!("Cannot list {}", dir.display()))?;
    Ok(entries.next().is_none())
}

/// Record a listing failure of `dir` in `report`; `None` skips the directory.
fn listed<T>(report: &mut BatchReport, dir: impl fmt::Display, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            report.fail(dir, &UnitError::Listing(err));
            None
        }
    }
}

/// All non-empty chapters of the speakers selected by `shard`, in
/// speaker-then-chapter lexicographic order.  Only an unreadable `root` is an
/// error; speaker and chapter directories that cannot be listed are recorded
/// in `report` and skipped.
pub fn chapters(root: &Path, shard: ShardRange, report: &mut BatchReport) -> Result<Vec<Chapter>> {
    let speakers = shard.apply(sorted_entries(root, true)?);
    let mut out = Vec::new();
    for (speaker, speaker_path) in speakers {
        let Some(entries) = listed(report, &speaker, sorted_entries(&speaker_path, true)) else {
            continue;
        };
        if entries.is_empty() {
            debug!(%speaker, "no chapter directories, skipping");
            continue;
        }
        for (chapter, path) in entries {
            let candidate = Chapter { speaker: speaker.clone(), chapter, path };
            match listed(report, &candidate, is_empty_dir(&candidate.path)) {
                Some(false) => out.push(candidate),
                Some(true) => debug!(chapter = %candidate, "empty chapter directory, skipping"),
                None => {}
            }
        }
    }
    Ok(out)
}

/// [`unit_files`] of one chapter; a listing failure is recorded in `report`
/// and yields no units.
pub fn chapter_units(chapter: &Chapter, ext: &str, report: &mut BatchReport) -> Vec<(String, PathBuf)> {
    listed(report, chapter, unit_files(&chapter.path, ext)).unwrap_or_default()
}

/// Files directly under `dir` with extension `ext`, as sorted `(stem, path)`.
pub fn unit_files(dir: &Path, ext: &str) -> Result<Vec<(String, PathBuf)>> {
    Ok(sorted_entries(dir, false)?
        .into_iter()
        .filter_map(|(name, path)| {
            let matches = path
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext));
            matches.then(|| (file_stem(&name).to_string(), path))
        })
        .collect())
}

/// Everything before the first `.` of a file name.
pub fn file_stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Write `bytes` to `path` through a sibling temporary file so that an
/// interrupted run never leaves a partial artifact behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("Cannot write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Cannot move into place: {}", path.display()))
}
