//! Waveform buffers, WAV I/O and sample-rate conversion.
//!
//! Samples are held as interleaved `f32` in `[-1.0, 1.0]`, so full scale is
//! `1.0` and loudness figures are dBFS.  Time positions are integer
//! milliseconds, converted to frames by truncation and back by rounding.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames handed to rubato per call.
const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples.
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self { sample_rate, channels, samples }
    }

    /// An empty buffer with the same format.
    pub fn empty_like(&self) -> Self {
        Self::new(self.sample_rate, self.channels, Vec::new())
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as f64 * 1000.0 / self.sample_rate as f64).round() as u64
    }

    /// Frame index at millisecond `ms`, clamped to the buffer.
    pub fn frame_at(&self, ms: u64) -> usize {
        let frame = (ms as f64 * self.sample_rate as f64 / 1000.0) as usize;
        frame.min(self.frames())
    }

    /// Copy of `[start_ms, end_ms)`.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> Self {
        let ch = self.channels.max(1) as usize;
        let start = self.frame_at(start_ms);
        let end = self.frame_at(end_ms).max(start);
        Self::new(self.sample_rate, self.channels, self.samples[start * ch..end * ch].to_vec())
    }

    /// Concatenate `other` after `self`. Formats must match.
    pub fn append(&mut self, other: &Waveform) {
        debug_assert_eq!(self.sample_rate, other.sample_rate);
        debug_assert_eq!(self.channels, other.channels);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Root-mean-square amplitude over all samples.
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / self.samples.len() as f64).sqrt()
    }

    /// Loudness relative to full scale; `-inf` for digital silence.
    pub fn dbfs(&self) -> f64 {
        amplitude_to_db(self.rms())
    }

    /// Split into per-channel sample vectors.
    pub fn planar(&self) -> Vec<Vec<f32>> {
        let ch = self.channels.max(1) as usize;
        (0..ch)
            .map(|c| self.samples.iter().skip(c).step_by(ch).copied().collect())
            .collect()
    }

    /// Bring the buffer to `target_rate` / `target_channels`, returned planar.
    ///
    /// Multi-channel input going to mono is averaged; mono going to N
    /// channels is duplicated.  Any other channel change is an error.
    pub fn convert(&self, target_rate: u32, target_channels: u16) -> Result<Vec<Vec<f32>>> {
        let planar = self.planar();
        let mixed = match (self.channels, target_channels) {
            (a, b) if a == b => planar,
            (_, 1) => {
                let n = planar.len() as f32;
                let frames = self.frames();
                vec![(0..frames).map(|i| planar.iter().map(|c| c[i]).sum::<f32>() / n).collect()]
            }
            (1, n) => vec![planar[0].clone(); n as usize],
            (a, b) => bail!("Cannot convert {} channels to {}", a, b),
        };
        resample(&mixed, self.sample_rate, target_rate)
    }
}

/// `20·log10(amplitude)` with full scale at `1.0`.
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

/// Inverse of [`amplitude_to_db`]; `-inf` maps to `0.0`.
pub fn db_to_amplitude(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Decode a WAV file into normalised interleaved `f32` samples.
pub fn read_wav(path: &Path) -> Result<Waveform> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Cannot open WAV: {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("Corrupt WAV data: {}", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Corrupt WAV data: {}", path.display()))?
        }
    };

    Ok(Waveform::new(spec.sample_rate, spec.channels, samples))
}

/// Encode `wav` as a 16-bit PCM WAV file image.
pub fn encode_wav(wav: &Waveform) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: wav.channels,
        sample_rate: wav.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::new();
    let mut writer =
        hound::WavWriter::new(std::io::Cursor::new(&mut buf), spec).context("Cannot start WAV")?;
    for &s in &wav.samples {
        let s16 = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s16).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    Ok(buf)
}

/// Write `wav` as 16-bit PCM, creating parent directories.
pub fn write_wav(wav: &Waveform, path: &Path) -> Result<()> {
    let bytes = encode_wav(wav)?;
    crate::layout::write_atomic(path, &bytes)
        .with_context(|| format!("Cannot write WAV: {}", path.display()))
}

/// Resample whole planar channels from `from` Hz to `to` Hz.
///
/// The resampler's group delay is trimmed so output sample `i` lines up with
/// input time `i / to`; output length is `round(len · to / from)`.
pub fn resample(channels: &[Vec<f32>], from: u32, to: u32) -> Result<Vec<Vec<f32>>> {
    if from == to || channels.is_empty() {
        return Ok(channels.to_vec());
    }
    let n_in = channels[0].len();
    let ratio = to as f64 / from as f64;
    let expected = (n_in as f64 * ratio).round() as usize;

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Cubic,
        RESAMPLE_CHUNK,
        channels.len(),
    )
    .map_err(|e| anyhow!("resampler init: {e}"))?;

    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];
    let mut buf = resampler.output_buffer_allocate(true);

    let push = |out: &mut Vec<Vec<f32>>, buf: &[Vec<f32>], produced: usize| {
        for (dst, src) in out.iter_mut().zip(buf) {
            dst.extend_from_slice(&src[..produced]);
        }
    };

    let mut pos = 0;
    while pos + RESAMPLE_CHUNK <= n_in {
        let block: Vec<&[f32]> = channels.iter().map(|c| &c[pos..pos + RESAMPLE_CHUNK]).collect();
        let (_, produced) = resampler
            .process_into_buffer(&block, &mut buf, None)
            .context("resampler process error")?;
        push(&mut out, &buf, produced);
        pos += RESAMPLE_CHUNK;
    }
    if pos < n_in {
        let tail: Vec<&[f32]> = channels.iter().map(|c| &c[pos..]).collect();
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(tail.as_slice()), &mut buf, None)
            .context("resampler process error")?;
        push(&mut out, &buf, produced);
    }
    while out[0].len() < expected + delay {
        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[&[f32]]>, &mut buf, None)
            .context("resampler flush error")?;
        if produced == 0 {
            break;
        }
        push(&mut out, &buf, produced);
    }

    for ch in &mut out {
        ch.drain(..delay.min(ch.len()));
        ch.resize(expected, 0.0);
    }
    Ok(out)
}
