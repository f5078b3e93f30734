//! Training manifest: join codec tokens with phoneme files and filter.
//!
//! Units are enumerated from the codec-token tree (speaker, chapter, unit, all
//! lexicographic); the phoneme file with the same identity is looked up under
//! the phoneme root.  A unit is kept only when:
//!
//! 1. its token matrix loads and is 2-D,
//! 2. its phoneme file holds exactly one non-empty line,
//! 3. the matrix has exactly [`ManifestConfig::channels`] columns,
//! 4. its frame count lies in `[min_frames, max_frames)`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    codec::TokenMatrix,
    error::UnitError,
    layout::{self, ShardRange, NPY_EXT, PHONE_EXT},
    report::{BatchReport, UnitOutcome},
};

#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Written into every record's `Dataset` field.
    pub dataset: String,
    /// Quantizer count of the codec that produced the tokens.
    pub channels: usize,
    /// Inclusive.
    pub min_frames: usize,
    /// Exclusive.
    pub max_frames: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            dataset: "small".into(),
            channels: 8,
            // 0.6 s and 30 s at 75 frames per second.
            min_frames: 45,
            max_frames: 2250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestRecord {
    pub dataset: String,
    pub speaker: String,
    pub chapter: String,
    pub uid: String,
    pub tokens: usize,
}

/// Channel and frame-count checks on a `[frames, channels]` shape.
pub fn check_shape(frames: usize, channels: usize, config: &ManifestConfig) -> Result<usize, UnitError> {
    if channels != config.channels {
        return Err(UnitError::ChannelMismatch { expected: config.channels, got: channels });
    }
    if frames < config.min_frames {
        return Err(UnitError::TooShort { frames, min: config.min_frames });
    }
    if frames >= config.max_frames {
        return Err(UnitError::TooLong { frames, max: config.max_frames });
    }
    Ok(frames)
}

/// The phoneme tokens of a `.phone` file that holds exactly one non-empty line.
pub fn load_phones(path: &Path) -> Result<Vec<String>, UnitError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| UnitError::PhoneLoad(format!("{}: {}", path.display(), e)))?;
    let lines: Vec<&str> = text.lines().collect();
    match lines.as_slice() {
        [line] if !line.trim().is_empty() => {
            Ok(line.trim().split(' ').map(str::to_string).collect())
        }
        [_] => Err(UnitError::PhoneLoad(format!("{}: empty line", path.display()))),
        other => Err(UnitError::PhoneLoad(format!(
            "{}: expected exactly one line, found {}",
            path.display(),
            other.len()
        ))),
    }
}

/// Validate one unit and return its frame count.
pub fn validate_unit(code_path: &Path, phone_path: &Path, config: &ManifestConfig) -> Result<usize, UnitError> {
    let tokens = TokenMatrix::load(code_path).map_err(UnitError::CodeLoad)?;
    load_phones(phone_path)?;
    check_shape(tokens.frames, tokens.channels, config)
}

/// Walk `codec_dir` and collect the records of every valid unit, in order.
pub fn build_manifest(
    codec_dir: &Path,
    phone_dir: &Path,
    config: &ManifestConfig,
    shard: ShardRange,
) -> Result<(Vec<ManifestRecord>, BatchReport)> {
    let mut records = Vec::new();
    let mut report = BatchReport::new("manifest");
    for chapter in layout::chapters(codec_dir, shard, &mut report)? {
        for (uid, code_path) in layout::chapter_units(&chapter, NPY_EXT, &mut report) {
            let key = chapter.unit(&uid);
            let phone_path = key.path(phone_dir, PHONE_EXT);
            match validate_unit(&code_path, &phone_path, config) {
                Ok(frames) => {
                    records.push(ManifestRecord {
                        dataset: config.dataset.clone(),
                        speaker: key.speaker.clone(),
                        chapter: key.chapter.clone(),
                        uid: key.uid.clone(),
                        tokens: frames,
                    });
                    report.record(&key, Ok(UnitOutcome::Written));
                }
                Err(err) => report.fail(&key, &err),
            }
        }
    }
    info!(records = records.len(), dataset = %config.dataset, "manifest built");
    report.log_summary();
    Ok((records, report))
}

/// Serialise `records` as one JSON array.
pub fn write_manifest(records: &[ManifestRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_vec(records).context("Failed to serialise manifest")?;
    layout::write_atomic(path, &json)
        .with_context(|| format!("Cannot write manifest: {}", path.display()))
}
