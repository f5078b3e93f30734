//! Silence-driven segmentation of one long recording into export chunks.
//!
//! 1. The silence threshold is the recording's own loudness minus a fixed
//!    offset, so it calibrates itself per recording.
//! 2. Windows of `min_silence_len` are scanned on a millisecond step; windows
//!    at or below the threshold are silent and contiguous silent windows form
//!    one silent range.
//! 3. Every non-silent range is widened by `keep_silence` on both sides and
//!    cut out; neighbours whose widened ranges would overlap meet halfway
//!    across the gap instead.
//! 4. Segments are merged greedily: the open chunk absorbs the next segment
//!    while it is shorter than `export_chunk_len`; the last chunk is emitted
//!    whatever its length.

use std::ops::Range;

use crate::audio::{db_to_amplitude, Waveform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentConfig {
    /// Minimum silence duration that splits two segments (ms).
    pub min_silence_len: u64,
    /// Silence retained on each side of a segment (ms).
    pub keep_silence: u64,
    /// Minimum duration of every chunk except the last (ms).
    pub export_chunk_len: u64,
    /// Threshold distance below the recording's mean loudness (dB).
    pub silence_offset_db: f64,
    /// Scan step of the silence detector (ms).
    pub seek_step: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_silence_len: 500,
            keep_silence: 500,
            export_chunk_len: 750,
            silence_offset_db: 14.0,
            seek_step: 1,
        }
    }
}

/// A merged, export-ready piece of a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-based position within the recording.
    pub index: usize,
    pub audio: Waveform,
}

impl Chunk {
    /// File stem `<recording>_<NN>`, zero-padded to two digits.
    pub fn stem(&self, recording: &str) -> String {
        chunk_stem(recording, self.index)
    }
}

pub fn chunk_stem(recording: &str, index: usize) -> String {
    format!("{}_{:02}", recording, index)
}

/// Anything the greedy merge can grow.
pub trait Mergeable {
    fn duration_ms(&self) -> u64;
    fn absorb(&mut self, next: Self);
}

impl Mergeable for Waveform {
    fn duration_ms(&self) -> u64 {
        Waveform::duration_ms(self)
    }

    fn absorb(&mut self, next: Self) {
        self.append(&next);
    }
}

/// Greedy left-to-right merge: every output item except the last is at
/// least `threshold_ms` long.
pub fn merge_greedy<T: Mergeable>(items: impl IntoIterator<Item = T>, threshold_ms: u64) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        match out.last_mut() {
            Some(open) if open.duration_ms() < threshold_ms => open.absorb(item),
            _ => out.push(item),
        }
    }
    out
}

/// Per-millisecond prefix sums of squared samples, for O(1) window RMS.
struct Energy {
    prefix: Vec<f64>,
    offsets: Vec<usize>,
}

impl Energy {
    fn new(wav: &Waveform) -> Self {
        let ms = wav.duration_ms();
        let ch = wav.channels.max(1) as usize;
        let mut prefix = Vec::with_capacity(ms as usize + 1);
        let mut offsets = Vec::with_capacity(ms as usize + 1);
        let mut acc = 0.0;
        prefix.push(0.0);
        offsets.push(0);
        for m in 0..ms {
            let (a, b) = (wav.frame_at(m) * ch, wav.frame_at(m + 1) * ch);
            acc += wav.samples[a..b].iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
            prefix.push(acc);
            offsets.push(b);
        }
        Self { prefix, offsets }
    }

    fn rms(&self, range: Range<u64>) -> f64 {
        let (a, b) = (range.start as usize, range.end as usize);
        let n = self.offsets[b] - self.offsets[a];
        if n == 0 {
            return 0.0;
        }
        ((self.prefix[b] - self.prefix[a]) / n as f64).max(0.0).sqrt()
    }
}

/// Silent ranges (ms) of `wav`: windows of `min_silence_len` whose RMS is at
/// or below `thresh_db` dBFS, merged while their starts stay within one
/// window of each other.
pub fn detect_silence(
    wav: &Waveform,
    min_silence_len: u64,
    thresh_db: f64,
    seek_step: u64,
) -> Vec<Range<u64>> {
    let len = wav.duration_ms();
    if len < min_silence_len {
        return Vec::new();
    }
    let thresh = db_to_amplitude(thresh_db);
    let energy = Energy::new(wav);
    let step = seek_step.max(1);

    let last_start = len - min_silence_len;
    let mut starts: Vec<u64> = (0..=last_start).step_by(step as usize).collect();
    if last_start % step != 0 {
        starts.push(last_start);
    }

    let silent_starts: Vec<u64> = starts
        .into_iter()
        .filter(|&s| energy.rms(s..s + min_silence_len) <= thresh)
        .collect();

    let Some((&first, rest)) = silent_starts.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut range_start = first;
    let mut prev = first;
    for &start in rest {
        let continuous = start == prev + step;
        let has_gap = start > prev + min_silence_len;
        if !continuous && has_gap {
            ranges.push(range_start..prev + min_silence_len);
            range_start = start;
        }
        prev = start;
    }
    ranges.push(range_start..prev + min_silence_len);
    ranges
}

/// Complement of [`detect_silence`]: ranges (ms) that contain sound.
/// A fully silent recording has none.
pub fn detect_nonsilent(
    wav: &Waveform,
    min_silence_len: u64,
    thresh_db: f64,
    seek_step: u64,
) -> Vec<Range<u64>> {
    let len = wav.duration_ms();
    if len == 0 {
        return Vec::new();
    }
    let silent = detect_silence(wav, min_silence_len, thresh_db, seek_step);
    if silent.is_empty() {
        return vec![0..len];
    }
    if silent[0].start == 0 && silent[0].end == len {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut prev_end = 0;
    for range in &silent {
        out.push(prev_end..range.start);
        prev_end = range.end;
    }
    if prev_end != len {
        out.push(prev_end..len);
    }
    out.retain(|r| !r.is_empty());
    out
}

/// Raw silence-delimited segments, each widened by `keep_silence`.  Where two
/// widened segments would overlap they are cut at the midpoint of the gap, so
/// no audio appears in both.
pub fn split_on_silence(wav: &Waveform, config: &SegmentConfig) -> Vec<Waveform> {
    let thresh_db = wav.dbfs() - config.silence_offset_db;
    let keep = config.keep_silence;
    let sound = detect_nonsilent(wav, config.min_silence_len, thresh_db, config.seek_step);

    let mut bounds: Vec<(u64, u64)> =
        sound.iter().map(|r| (r.start.saturating_sub(keep), r.end + keep)).collect();
    for i in 1..sound.len() {
        let (prev_end, next_start) = (sound[i - 1].end, sound[i].start);
        if next_start < prev_end + 2 * keep {
            let mid = (prev_end + next_start) / 2;
            bounds[i - 1].1 = mid;
            bounds[i].0 = mid;
        }
    }

    bounds.into_iter().map(|(start, end)| wav.slice_ms(start, end)).collect()
}

/// Segment and merge one recording into numbered chunks.  An empty result
/// means "no segments": the caller skips the recording.
pub fn segment(wav: &Waveform, config: &SegmentConfig) -> Vec<Chunk> {
    merge_greedy(split_on_silence(wav, config), config.export_chunk_len)
        .into_iter()
        .enumerate()
        .map(|(i, audio)| Chunk { index: i + 1, audio })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    #[derive(Debug, Clone, PartialEq)]
    struct Span(u64);

    impl Mergeable for Span {
        fn duration_ms(&self) -> u64 {
            self.0
        }
        fn absorb(&mut self, next: Self) {
            self.0 += next.0;
        }
    }

    fn merged(durations: &[u64], threshold: u64) -> Vec<u64> {
        merge_greedy(durations.iter().map(|&d| Span(d)), threshold)
            .into_iter()
            .map(|s| s.0)
            .collect()
    }

    /// Tone with digital silence over each `(start_ms, end_ms)` gap.
    fn tone_with_gaps(total_ms: u64, gaps: &[(u64, u64)]) -> Waveform {
        let per_ms = (SR / 1000) as usize;
        let n = total_ms as usize * per_ms;
        let samples = (0..n)
            .map(|i| {
                let ms = (i / per_ms) as u64;
                if gaps.iter().any(|&(a, b)| ms >= a && ms < b) {
                    0.0
                } else {
                    0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin()
                }
            })
            .collect();
        Waveform::new(SR, 1, samples)
    }

    #[test]
    fn test_merge_worked_example() {
        assert_eq!(
            merged(&[200, 300, 400, 1000, 100, 800, 50], 750),
            vec![900, 1000, 900, 50]
        );
    }

    #[test]
    fn test_merge_invariants() {
        let cases: &[&[u64]] = &[
            &[],
            &[10],
            &[800, 800, 800],
            &[100; 20],
            &[749, 1, 749, 2, 5000, 3],
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 1000],
        ];
        for &durations in cases {
            let out = merged(durations, 750);
            assert_eq!(out.iter().sum::<u64>(), durations.iter().sum::<u64>(), "{durations:?}");
            if let Some((_, body)) = out.split_last() {
                assert!(body.iter().all(|&d| d >= 750), "{durations:?} -> {out:?}");
            }
            // Every chunk is a sum of consecutive inputs: replay the boundaries.
            let mut it = durations.iter();
            for &chunk in &out {
                let mut acc = 0;
                while acc < chunk {
                    acc += it.next().expect("ran out of inputs");
                }
                assert_eq!(acc, chunk, "{durations:?} -> {out:?}");
            }
            assert!(it.next().is_none());
        }
    }

    #[test]
    fn test_last_chunk_not_force_merged() {
        assert_eq!(merged(&[800, 10], 750), vec![800, 10]);
    }

    #[test]
    fn test_no_silence_single_segment() {
        let wav = tone_with_gaps(2_000, &[]);
        let config = SegmentConfig::default();
        let raw = split_on_silence(&wav, &config);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].duration_ms(), 2_000);
    }

    #[test]
    fn test_fully_silent_yields_no_chunks() {
        let wav = Waveform::new(SR, 1, vec![0.0; SR as usize * 3]);
        assert!(segment(&wav, &SegmentConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_recording_yields_no_chunks() {
        let wav = Waveform::new(SR, 1, Vec::new());
        assert!(segment(&wav, &SegmentConfig::default()).is_empty());
    }

    #[test]
    fn test_short_recording_has_no_silence() {
        let wav = Waveform::new(SR, 1, vec![0.0; 4_000]);
        assert!(detect_silence(&wav, 500, -20.0, 1).is_empty());
    }

    #[test]
    fn test_detect_silence_bounds() {
        let wav = tone_with_gaps(4_000, &[(1_000, 2_000)]);
        let thresh = wav.dbfs() - 14.0;
        let silent = detect_silence(&wav, 500, thresh, 1);
        assert_eq!(silent.len(), 1, "{silent:?}");
        let r = &silent[0];
        // A window may hold a few ms of tone and still sit under the threshold.
        assert!((950..=1_000).contains(&r.start), "{r:?}");
        assert!((2_000..=2_050).contains(&r.end), "{r:?}");
    }

    #[test]
    fn test_short_gap_does_not_split() {
        let wav = tone_with_gaps(3_000, &[(1_000, 1_300)]);
        let raw = split_on_silence(&wav, &SegmentConfig::default());
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn test_keep_silence_widens_segments() {
        let wav = tone_with_gaps(6_000, &[(2_000, 4_000)]);
        let config = SegmentConfig { keep_silence: 200, ..SegmentConfig::default() };
        let raw = split_on_silence(&wav, &config);
        assert_eq!(raw.len(), 2);
        // First segment: tone up to ~2000 ms plus 200 ms of kept silence.
        let d0 = raw[0].duration_ms();
        assert!((2_150..=2_250).contains(&d0), "{d0}");
        let d1 = raw[1].duration_ms();
        assert!((2_150..=2_250).contains(&d1), "{d1}");
    }

    #[test]
    fn test_overlapping_keep_silence_meets_halfway() {
        // 600 ms gap, 500 ms kept on each side: the widened ranges would overlap.
        let wav = tone_with_gaps(2_600, &[(1_000, 1_600)]);
        let raw = split_on_silence(&wav, &SegmentConfig::default());
        assert_eq!(raw.len(), 2);
        let d0 = raw[0].duration_ms();
        assert!((1_290..=1_310).contains(&d0), "{d0}");
        let total: u64 = raw.iter().map(|w| w.duration_ms()).sum();
        assert_eq!(total, wav.duration_ms(), "no audio may be repeated");

        let chunks = segment(&wav, &SegmentConfig::default());
        let merged: u64 = chunks.iter().map(|c| c.audio.duration_ms()).sum();
        assert_eq!(merged, wav.duration_ms());
    }

    #[test]
    fn test_ten_second_scenario() {
        let wav = tone_with_gaps(10_000, &[(3_000, 4_000), (6_500, 7_500)]);
        let chunks = segment(&wav, &SegmentConfig::default());
        assert!((2..=3).contains(&chunks.len()), "got {} chunks", chunks.len());

        let (last, body) = chunks.split_last().unwrap();
        for chunk in body {
            assert!(chunk.audio.duration_ms() >= 750);
        }
        assert!(last.audio.duration_ms() > 0);

        let stems: Vec<_> = chunks.iter().map(|c| c.stem("rec")).collect();
        assert_eq!(stems[0], "rec_01");
        assert_eq!(stems[1], "rec_02");
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i + 1);
        }
    }

    #[test]
    fn test_short_segments_merge_to_threshold() {
        // Four 300 ms bursts separated by 600 ms of silence.
        let wav = tone_with_gaps(
            3_000,
            &[(300, 900), (1_200, 1_800), (2_100, 2_700)],
        );
        let config = SegmentConfig { keep_silence: 0, ..SegmentConfig::default() };
        let raw = split_on_silence(&wav, &config);
        assert_eq!(raw.len(), 4, "{:?}", raw.iter().map(|w| w.duration_ms()).collect::<Vec<_>>());

        let chunks = segment(&wav, &config);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].audio.duration_ms() >= 750);
    }

    #[test]
    fn test_chunk_stem_padding() {
        assert_eq!(chunk_stem("a", 1), "a_01");
        assert_eq!(chunk_stem("a", 12), "a_12");
        assert_eq!(chunk_stem("a", 123), "a_123");
    }
}
