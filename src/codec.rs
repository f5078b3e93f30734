//! Neural audio codec tokens.
//!
//! The codec collaborator turns a waveform at its own sample rate / channel
//! layout into `n_q` parallel codebook streams.  They are stored per file as a
//! `[T, n_q]` integer matrix (`T` frames, one column per quantizer) in NPY.
//!
//! [`OnnxCodec`] drives an EnCodec-style encoder exported to ONNX:
//!
//! | Tensor  | Shape               | dtype   |
//! |---------|---------------------|---------|
//! | input   | `[1, channels, N]`  | float32 |
//! | output  | `[1, n_q, T]`       | int64   |

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Context, Result};
use ort::{session::Session, value::Tensor};
use serde::Deserialize;
use tracing::info;

use crate::{
    audio::read_wav,
    error::UnitError,
    layout::{self, ShardRange, NPY_EXT, WAV_EXT},
    npy::{encode_npy, load_npy},
    report::{BatchReport, UnitOutcome},
};

/// `[frames, channels]` integer token matrix, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatrix {
    pub frames: usize,
    pub channels: usize,
    pub data: Vec<i64>,
}

impl TokenMatrix {
    pub fn new(frames: usize, channels: usize, data: Vec<i64>) -> Result<Self> {
        let Some(needed) = frames.checked_mul(channels) else {
            bail!("token matrix [{}, {}] is too large", frames, channels);
        };
        if needed != data.len() {
            bail!("token matrix [{}, {}] needs {} values, got {}", frames, channels, needed, data.len());
        }
        Ok(Self { frames, channels, data })
    }

    /// Transpose codebook-major codes `[n_q, T]` into `[T, n_q]`.
    pub fn from_codebooks(n_q: usize, frames: usize, codes: &[i64]) -> Result<Self> {
        if n_q.checked_mul(frames) != Some(codes.len()) {
            bail!("codec returned {} codes for {} quantizers x {} frames", codes.len(), n_q, frames);
        }
        let mut data = Vec::with_capacity(codes.len());
        for t in 0..frames {
            data.extend((0..n_q).map(|q| codes[q * frames + t]));
        }
        Self::new(frames, n_q, data)
    }

    pub fn row(&self, t: usize) -> &[i64] {
        &self.data[t * self.channels..(t + 1) * self.channels]
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.frames, self.channels]
    }

    pub fn to_npy(&self) -> Result<Vec<u8>> {
        encode_npy(&self.shape(), &self.data)
    }

    /// Load a 2-D matrix written by [`TokenMatrix::to_npy`] or NumPy.
    pub fn load(path: &Path) -> Result<Self> {
        let arr = load_npy(path)?;
        match arr.shape.as_slice() {
            &[frames, channels] => Self::new(frames, channels, arr.data),
            other => bail!("expected a 2-D token matrix, got shape {:?}", other),
        }
    }
}

/// The codec collaborator: `encode(waveform) -> [T, C]`.
pub trait CodecModel {
    /// Rate the waveform must be resampled to.
    fn sample_rate(&self) -> u32;
    /// Channel count the waveform must be converted to.
    fn channels(&self) -> u16;
    /// Fixed number of quantizers, i.e. matrix columns.
    fn num_quantizers(&self) -> usize;
    /// Encode planar channels at [`sample_rate`](Self::sample_rate).
    fn encode(&self, waveform: &[Vec<f32>]) -> Result<TokenMatrix>;
}

/// `config.json` next to an exported codec.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    /// ONNX file inside the model directory.
    pub model_file: String,
    #[serde(default = "default_codec_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_codec_channels")]
    pub channels: u16,
    /// 8 for a 24 kHz EnCodec at 6 kbps.
    #[serde(default = "default_quantizers")]
    pub num_quantizers: usize,
}

fn default_codec_rate() -> u32 {
    24_000
}

fn default_codec_channels() -> u16 {
    1
}

fn default_quantizers() -> usize {
    8
}

pub struct OnnxCodec {
    session: Mutex<Session>,
    config: CodecConfig,
}

impl OnnxCodec {
    /// Load `config.json` and the ONNX graph it names from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let bytes = std::fs::read(&config_path)
            .with_context(|| format!("Cannot read codec config: {}", config_path.display()))?;
        let config: CodecConfig =
            serde_json::from_slice(&bytes).context("Failed to parse codec config.json")?;

        let model_path = dir.join(&config.model_file);
        let session = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Cannot load ONNX codec: {}", model_path.display()))?;

        info!(
            model = %model_path.display(),
            sample_rate = config.sample_rate,
            channels = config.channels,
            quantizers = config.num_quantizers,
            "codec loaded"
        );
        Ok(Self { session: Mutex::new(session), config })
    }
}

impl CodecModel for OnnxCodec {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn num_quantizers(&self) -> usize {
        self.config.num_quantizers
    }

    fn encode(&self, waveform: &[Vec<f32>]) -> Result<TokenMatrix> {
        let channels = waveform.len();
        let n = waveform.first().map_or(0, Vec::len);
        let input = Tensor::<f32>::from_array(([1usize, channels, n], waveform.concat()))
            .context("Failed to build codec input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("codec session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![input])
            .context("Codec inference failed")?;

        let (shape, codes) = outputs[0]
            .try_extract_tensor::<i64>()
            .context("Failed to extract codes tensor")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let (n_q, frames) = match dims.as_slice() {
            &[1, q, t] | &[q, t] => (q, t),
            other => bail!("unexpected codes shape {:?}", other),
        };
        TokenMatrix::from_codebooks(n_q, frames, codes)
    }
}

/// Decode, convert and encode one audio file.
pub fn encode_file(model: &dyn CodecModel, path: &Path) -> Result<TokenMatrix, UnitError> {
    let wav = read_wav(path).map_err(UnitError::Decode)?;
    let planar = wav
        .convert(model.sample_rate(), model.channels())
        .map_err(UnitError::Decode)?;
    let tokens = model.encode(&planar).map_err(UnitError::Model)?;
    if tokens.channels != model.num_quantizers() {
        return Err(UnitError::ChannelMismatch {
            expected: model.num_quantizers(),
            got: tokens.channels,
        });
    }
    Ok(tokens)
}

/// Encode `wav_path` into `out_path` unless the output already exists.
/// Nothing is written when encoding fails.
pub fn encode_unit(
    model: &dyn CodecModel,
    wav_path: &Path,
    out_path: &Path,
) -> Result<UnitOutcome, UnitError> {
    if out_path.exists() {
        return Ok(UnitOutcome::Existing);
    }
    let tokens = encode_file(model, wav_path)?;
    let bytes = tokens.to_npy().map_err(UnitError::Write)?;
    layout::write_atomic(out_path, &bytes).map_err(UnitError::Write)?;
    Ok(UnitOutcome::Written)
}

/// Encode every `.wav` under `in_dir` into `out_dir/<spk>/<chapter>/<uid>.npy`.
pub fn encode_corpus(
    model: &dyn CodecModel,
    in_dir: &Path,
    out_dir: &Path,
    shard: ShardRange,
) -> Result<BatchReport> {
    let mut report = BatchReport::new("codec");
    for chapter in layout::chapters(in_dir, shard, &mut report)? {
        info!(speaker = %chapter.speaker, chapter = %chapter.chapter, "encoding chapter");
        for (uid, wav_path) in layout::chapter_units(&chapter, WAV_EXT, &mut report) {
            let key = chapter.unit(&uid);
            let out_path: PathBuf = key.path(out_dir, NPY_EXT);
            report.record(&key, encode_unit(model, &wav_path, &out_path));
        }
    }
    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav, Waveform};
    use std::cell::Cell;

    /// Emits one frame per 320 input samples, codes = frame index.
    struct FakeCodec {
        quantizers: usize,
        calls: Cell<usize>,
        fail: bool,
    }

    impl FakeCodec {
        fn new(quantizers: usize) -> Self {
            Self { quantizers, calls: Cell::new(0), fail: false }
        }
    }

    impl CodecModel for FakeCodec {
        fn sample_rate(&self) -> u32 {
            24_000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn num_quantizers(&self) -> usize {
            8
        }
        fn encode(&self, waveform: &[Vec<f32>]) -> Result<TokenMatrix> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                bail!("out of cheese");
            }
            assert_eq!(waveform.len(), 1);
            let frames = waveform[0].len() / 320;
            let codes: Vec<i64> = (0..self.quantizers)
                .flat_map(|q| (0..frames).map(move |t| (q * 1000 + t) as i64))
                .collect();
            TokenMatrix::from_codebooks(self.quantizers, frames, &codes)
        }
    }

    fn write_tone(path: &Path, sample_rate: u32, ms: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let n = (sample_rate * ms / 1000) as usize;
        let samples = (0..n).map(|i| 0.3 * (i as f32 * 0.05).sin()).collect();
        write_wav(&Waveform::new(sample_rate, 1, samples), path).unwrap();
    }

    #[test]
    fn test_from_codebooks_transposes() {
        // n_q = 2, T = 3: [[0, 1, 2], [10, 11, 12]]
        let m = TokenMatrix::from_codebooks(2, 3, &[0, 1, 2, 10, 11, 12]).unwrap();
        assert_eq!(m.shape(), [3, 2]);
        assert_eq!(m.row(0), &[0, 10]);
        assert_eq!(m.row(2), &[2, 12]);
        assert!(TokenMatrix::from_codebooks(2, 3, &[0; 5]).is_err());
    }

    #[test]
    fn test_oversized_shape_is_an_error() {
        assert!(TokenMatrix::new(usize::MAX, 8, Vec::new()).is_err());
        assert!(TokenMatrix::from_codebooks(usize::MAX, 2, &[]).is_err());
    }

    #[test]
    fn test_save_and_load_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.npy");
        let m = TokenMatrix::new(2, 8, (0..16).collect()).unwrap();
        std::fs::write(&path, m.to_npy().unwrap()).unwrap();
        assert_eq!(TokenMatrix::load(&path).unwrap(), m);
    }

    #[test]
    fn test_load_rejects_1d() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.npy");
        std::fs::write(&path, encode_npy(&[4], &[1, 2, 3, 4]).unwrap()).unwrap();
        assert!(TokenMatrix::load(&path).is_err());
    }

    #[test]
    fn test_encode_file_resamples_to_codec_rate() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        write_tone(&wav, 16_000, 1_000);

        let codec = FakeCodec::new(8);
        let tokens = encode_file(&codec, &wav).unwrap();
        // 1 s at 24 kHz / 320 samples per frame.
        assert_eq!(tokens.frames, 75);
        assert_eq!(tokens.channels, 8);
    }

    #[test]
    fn test_channel_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        write_tone(&wav, 24_000, 500);
        let err = encode_file(&FakeCodec::new(7), &wav).unwrap_err();
        assert!(matches!(err, UnitError::ChannelMismatch { expected: 8, got: 7 }), "{err}");
    }

    #[test]
    fn test_encode_corpus_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_tone(&input.join("spk").join("ch").join("r_01.wav"), 24_000, 600);
        write_tone(&input.join("spk").join("ch").join("r_02.wav"), 24_000, 900);
        std::fs::write(input.join("spk").join("ch").join("r_01.txt"), "Hi").unwrap();

        let codec = FakeCodec::new(8);
        let first = encode_corpus(&codec, &input, &output, ShardRange::ALL).unwrap();
        assert_eq!(first.written, 2);
        assert_eq!(codec.calls.get(), 2);

        let out = output.join("spk").join("ch").join("r_02.npy");
        let before = std::fs::read(&out).unwrap();
        let loaded = TokenMatrix::load(&out).unwrap();
        assert_eq!(loaded.shape(), [67, 8]);

        let second = encode_corpus(&codec, &input, &output, ShardRange::ALL).unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(codec.calls.get(), 2, "model must not be re-invoked");
        assert_eq!(std::fs::read(&out).unwrap(), before);
    }

    #[test]
    fn test_model_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_tone(&input.join("spk").join("ch").join("r_01.wav"), 24_000, 600);

        let codec = FakeCodec { fail: true, ..FakeCodec::new(8) };
        let report = encode_corpus(&codec, &input, &output, ShardRange::ALL).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, "model");
        assert!(!output.join("spk").join("ch").join("r_01.npy").exists());
    }

    #[test]
    fn test_corrupt_audio_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let chapter = input.join("spk").join("ch");
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(chapter.join("bad.wav"), b"not a wav").unwrap();
        write_tone(&chapter.join("good.wav"), 24_000, 400);

        let codec = FakeCodec::new(8);
        let report = encode_corpus(&codec, &input, &dir.path().join("out"), ShardRange::ALL).unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, "decode");
        assert_eq!(report.failures[0].unit, "spk/ch/bad");
    }
}
