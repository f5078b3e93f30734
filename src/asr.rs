//! Speech recognition collaborator.
//!
//! [`CtcRecognizer`] runs a wav2vec2-style CTC acoustic model exported to ONNX:
//!
//! | Tensor         | Shape          | dtype   |
//! |----------------|----------------|---------|
//! | `input_values` | `[1, samples]` | float32 |
//! | `logits`       | `[1, T, V]`    | float32 |
//!
//! and greedy-decodes the logits with the model's HuggingFace `vocab.json`.

use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::{anyhow, bail, Context, Result};
use ort::{session::Session, value::Tensor};
use serde::Deserialize;
use tracing::info;

/// `transcribe(audio) -> text`.  Audio is mono at [`sample_rate`](Self::sample_rate).
pub trait Recognizer {
    fn sample_rate(&self) -> u32;
    fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// `config.json` next to an exported recogniser.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    pub model_file: String,
    #[serde(default = "default_vocab_file")]
    pub vocab_file: String,
    #[serde(default = "default_asr_rate")]
    pub sample_rate: u32,
    /// CTC blank.
    #[serde(default)]
    pub pad_token_id: usize,
    #[serde(default = "default_word_delimiter")]
    pub word_delimiter: String,
    /// Zero-mean / unit-variance input normalisation.
    #[serde(default = "default_true")]
    pub do_normalize: bool,
}

fn default_vocab_file() -> String {
    "vocab.json".to_string()
}

fn default_asr_rate() -> u32 {
    16_000
}

fn default_word_delimiter() -> String {
    "|".to_string()
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Index → token table built from a `{"token": id}` vocabulary.
pub fn vocab_from_json(bytes: &[u8]) -> Result<Vec<String>> {
    let map: HashMap<String, usize> =
        serde_json::from_slice(bytes).context("Failed to parse vocab.json")?;
    let size = map.values().max().map_or(0, |&m| m + 1);
    let mut vocab = vec![String::new(); size];
    for (token, id) in map {
        vocab[id] = token;
    }
    Ok(vocab)
}

/// Greedy CTC decoding of per-frame best ids.
///
/// Repeats are collapsed before blanks are dropped, so `a a <pad> a` yields
/// `aa`.  Special tokens (`<s>`, `</s>`, `<unk>`) are dropped, the word
/// delimiter becomes a space.
pub fn ctc_greedy_decode(ids: &[usize], vocab: &[String], pad_id: usize, word_delimiter: &str) -> String {
    let mut out = String::new();
    let mut prev = None;
    for &id in ids {
        if prev == Some(id) {
            continue;
        }
        prev = Some(id);
        if id == pad_id {
            continue;
        }
        let Some(token) = vocab.get(id) else { continue };
        if token == word_delimiter {
            out.push(' ');
        } else if !(token.starts_with('<') && token.ends_with('>')) {
            out.push_str(token);
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim, then upper-case the first character and lower-case the rest.
pub fn normalize_transcript(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn normalize_input(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let var = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
    let scale = (var + 1e-7).sqrt();
    samples.iter().map(|&s| ((s as f64 - mean) / scale) as f32).collect()
}

fn argmax_rows(logits: &[f32], vocab_size: usize) -> Vec<usize> {
    logits
        .chunks_exact(vocab_size)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// CtcRecognizer
// ─────────────────────────────────────────────────────────────────────────────

pub struct CtcRecognizer {
    session: Mutex<Session>,
    vocab: Vec<String>,
    config: RecognizerConfig,
}

impl CtcRecognizer {
    /// Load `config.json`, the vocabulary and the ONNX graph from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let bytes = std::fs::read(&config_path)
            .with_context(|| format!("Cannot read recogniser config: {}", config_path.display()))?;
        let config: RecognizerConfig =
            serde_json::from_slice(&bytes).context("Failed to parse recogniser config.json")?;

        let vocab_path = dir.join(&config.vocab_file);
        let vocab = vocab_from_json(
            &std::fs::read(&vocab_path)
                .with_context(|| format!("Cannot read vocabulary: {}", vocab_path.display()))?,
        )?;

        let model_path = dir.join(&config.model_file);
        let session = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Cannot load ONNX recogniser: {}", model_path.display()))?;

        info!(model = %model_path.display(), vocab = vocab.len(), "recogniser loaded");
        Ok(Self { session: Mutex::new(session), vocab, config })
    }
}

impl Recognizer for CtcRecognizer {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let input = if self.config.do_normalize {
            normalize_input(samples)
        } else {
            samples.to_vec()
        };
        let n = input.len();
        let tensor = Tensor::<f32>::from_array(([1usize, n], input))
            .context("Failed to build recogniser input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("recogniser session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .context("Recogniser inference failed")?;
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract logits tensor")?;

        let vocab_size = match shape.last() {
            Some(&v) if v > 0 => v as usize,
            _ => bail!("unexpected logits shape {:?}", shape.to_vec()),
        };
        let ids = argmax_rows(logits, vocab_size);
        Ok(ctc_greedy_decode(
            &ids,
            &self.vocab,
            self.config.pad_token_id,
            &self.config.word_delimiter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<String> {
        vocab_from_json(br#"{"<pad>": 0, "<s>": 1, "</s>": 2, "<unk>": 3, "|": 4, "H": 5, "I": 6, "L": 7}"#)
            .unwrap()
    }

    #[test]
    fn test_vocab_indexed_by_id() {
        let v = vocab();
        assert_eq!(v.len(), 8);
        assert_eq!(v[4], "|");
        assert_eq!(v[7], "L");
    }

    #[test]
    fn test_ctc_collapse_and_blank() {
        // H H <pad> I | | H I L <pad> L
        let ids = [5, 5, 0, 6, 4, 4, 5, 6, 7, 0, 7];
        assert_eq!(ctc_greedy_decode(&ids, &vocab(), 0, "|"), "HI HILL");
    }

    #[test]
    fn test_ctc_drops_specials_and_edge_delimiters() {
        let ids = [4, 1, 5, 3, 6, 2, 4];
        assert_eq!(ctc_greedy_decode(&ids, &vocab(), 0, "|"), "HI");
        assert_eq!(ctc_greedy_decode(&[0, 0, 0], &vocab(), 0, "|"), "");
    }

    #[test]
    fn test_argmax_rows() {
        let logits = [0.1, 0.9, 0.0, 2.0, -1.0, 1.0];
        assert_eq!(argmax_rows(&logits, 3), vec![1, 0]);
    }

    #[test]
    fn test_normalize_transcript() {
        assert_eq!(normalize_transcript("  HELLO World  "), "Hello world");
        assert_eq!(normalize_transcript(" éCOLE"), "École");
        assert_eq!(normalize_transcript("   "), "");
    }

    #[test]
    fn test_input_normalisation() {
        let out = normalize_input(&[1.0, 3.0]);
        assert!((out[0] + 1.0).abs() < 1e-3, "{out:?}");
        assert!((out[1] - 1.0).abs() < 1e-3, "{out:?}");
        assert!(normalize_input(&[]).is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let cfg: RecognizerConfig = serde_json::from_str(r#"{"model_file": "model.onnx"}"#).unwrap();
        assert_eq!(cfg.vocab_file, "vocab.json");
        assert_eq!(cfg.sample_rate, 16_000);
        assert_eq!(cfg.pad_token_id, 0);
        assert_eq!(cfg.word_delimiter, "|");
        assert!(cfg.do_normalize);
    }
}
