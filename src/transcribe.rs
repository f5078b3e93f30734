//! Segment-and-transcribe stage.
//!
//! Every long-form `.wav` under the input root is split into chunks written
//! as `out/<spk>/<chapter>/<name>_NN.wav`; each chunk then gets a
//! `<name>_NN.txt` transcript.  Both steps are skipped for artifacts that
//! already exist, so a run can be restarted after interruption.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::{
    asr::{normalize_transcript, Recognizer},
    audio::{read_wav, write_wav},
    error::UnitError,
    layout::{self, ShardRange, TXT_EXT, WAV_EXT},
    report::{BatchReport, UnitOutcome},
    segment::{chunk_stem, segment, SegmentConfig},
};

/// `true` for `<recording>_<digits>` with at least two digits.
fn is_chunk_of(stem: &str, recording: &str) -> bool {
    stem.strip_prefix(recording)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|n| n.len() >= 2 && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Chunk files of `recording` in `out_dir`, segmenting the recording first if
/// its `_01` chunk is not there yet.  An empty list means no segments.
///
/// `_01` is written after every other chunk, so its presence means the
/// recording was segmented completely; an interrupted run re-segments.
pub fn prepare_chunks(
    wav_path: &Path,
    out_dir: &Path,
    recording: &str,
    config: &SegmentConfig,
) -> Result<Vec<(String, PathBuf)>, UnitError> {
    let first = out_dir.join(format!("{}.{}", chunk_stem(recording, 1), WAV_EXT));
    if first.exists() {
        debug!(recording, "chunks exist, reusing");
        let existing = layout::unit_files(out_dir, WAV_EXT).map_err(UnitError::Decode)?;
        return Ok(existing
            .into_iter()
            .filter(|(stem, _)| is_chunk_of(stem, recording))
            .collect());
    }

    let wav = read_wav(wav_path).map_err(UnitError::Decode)?;
    let chunks = segment(&wav, config);
    let path_of = |stem: &str| out_dir.join(format!("{}.{}", stem, WAV_EXT));
    for chunk in chunks.iter().skip(1).chain(chunks.first()) {
        write_wav(&chunk.audio, &path_of(&chunk.stem(recording))).map_err(UnitError::Write)?;
    }
    Ok(chunks
        .iter()
        .map(|chunk| {
            let stem = chunk.stem(recording);
            let path = path_of(&stem);
            (stem, path)
        })
        .collect())
}

/// Transcribe one chunk into `txt_path` unless it already exists.
pub fn transcribe_chunk(
    recognizer: &dyn Recognizer,
    chunk_path: &Path,
    txt_path: &Path,
) -> Result<UnitOutcome, UnitError> {
    if txt_path.exists() {
        return Ok(UnitOutcome::Existing);
    }
    let wav = read_wav(chunk_path).map_err(UnitError::Decode)?;
    let mono = wav
        .convert(recognizer.sample_rate(), 1)
        .map_err(UnitError::Decode)?
        .swap_remove(0);
    let text = recognizer.transcribe(&mono).map_err(UnitError::Model)?;
    let text = normalize_transcript(&text);
    layout::write_atomic(txt_path, text.as_bytes()).map_err(UnitError::Write)?;
    Ok(UnitOutcome::Written)
}

/// Segment every recording under `in_dir` and transcribe its chunks into
/// `out_dir`.  Counters are per chunk, except `empty`, which counts
/// recordings that yielded no segments.
pub fn transcribe_corpus(
    recognizer: &dyn Recognizer,
    in_dir: &Path,
    out_dir: &Path,
    config: &SegmentConfig,
    shard: ShardRange,
) -> Result<BatchReport> {
    let mut report = BatchReport::new("segment");
    for chapter in layout::chapters(in_dir, shard, &mut report)? {
        info!(speaker = %chapter.speaker, chapter = %chapter.chapter, "transcribing chapter");
        let chapter_out = chapter.under(out_dir);
        for (name, wav_path) in layout::chapter_units(&chapter, WAV_EXT, &mut report) {
            let key = chapter.unit(&name);
            let chunks = match prepare_chunks(&wav_path, &chapter_out, &name, config) {
                Ok(chunks) => chunks,
                Err(err) => {
                    report.fail(&key, &err);
                    continue;
                }
            };
            if chunks.is_empty() {
                report.record(&key, Ok(UnitOutcome::Empty));
                continue;
            }
            for (stem, chunk_path) in chunks {
                let chunk_key = chapter.unit(&stem);
                let txt_path = chunk_key.path(out_dir, TXT_EXT);
                report.record(&chunk_key, transcribe_chunk(recognizer, &chunk_path, &txt_path));
            }
        }
    }
    report.log_summary();
    Ok(report)
}
