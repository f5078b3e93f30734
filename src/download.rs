//! Model directory resolution with HuggingFace Hub fallback.
//!
//! A model argument is either a local directory holding `config.json` and the
//! files it names, or a HuggingFace repository id.  Repositories are fetched
//! file by file into the Hub cache (`~/.cache/huggingface/hub` by default)
//! and the snapshot directory is used as the model directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use serde::Deserialize;
use tracing::info;

use crate::{asr::CtcRecognizer, codec::OnnxCodec};

/// The part of any model `config.json` that names companion files.
#[derive(Debug, Deserialize)]
struct ModelFiles {
    model_file: String,
    #[serde(default)]
    vocab_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Codec,
    Recognizer,
}

impl ModelKind {
    fn default_companions(self) -> &'static [&'static str] {
        match self {
            Self::Codec => &[],
            Self::Recognizer => &["vocab.json"],
        }
    }
}

/// Download a single file from a HuggingFace repository.
fn hf_download(api: &Api, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let repo = api.model(repo_id.to_string());
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

/// Fetch `config.json` and every file it names; returns the snapshot directory.
pub fn fetch_from_hub(repo_id: &str, kind: ModelKind) -> Result<PathBuf> {
    info!(repo_id, "downloading model config");
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;

    let config_path = hf_download(&api, repo_id, "config.json")?;
    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
    let files: ModelFiles =
        serde_json::from_slice(&config_bytes).context("Failed to parse config.json")?;

    info!(file = %files.model_file, "downloading model file");
    hf_download(&api, repo_id, &files.model_file)?;
    match files.vocab_file {
        Some(vocab) => {
            hf_download(&api, repo_id, &vocab)?;
        }
        None => {
            for name in kind.default_companions() {
                hf_download(&api, repo_id, name)?;
            }
        }
    }

    config_path
        .parent()
        .map(Path::to_path_buf)
        .context("Hub cache path has no parent directory")
}

/// A local directory as-is, anything else as a Hub repository id.
pub fn resolve_model_dir(spec: &str, kind: ModelKind) -> Result<PathBuf> {
    let local = Path::new(spec);
    if local.is_dir() {
        return Ok(local.to_path_buf());
    }
    fetch_from_hub(spec, kind)
}

pub fn load_codec(spec: &str) -> Result<OnnxCodec> {
    OnnxCodec::load(&resolve_model_dir(spec, ModelKind::Codec)?)
}

pub fn load_recognizer(spec: &str) -> Result<CtcRecognizer> {
    CtcRecognizer::load(&resolve_model_dir(spec, ModelKind::Recognizer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_directory_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let spec = dir.path().to_str().unwrap();
        assert_eq!(resolve_model_dir(spec, ModelKind::Codec).unwrap(), dir.path());
    }

    #[test]
    fn test_local_directory_without_config_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_codec(dir.path().to_str().unwrap()).err().unwrap();
        assert!(format!("{err:#}").contains("config.json"), "{err:#}");
    }

    #[test]
    fn test_model_files_schema() {
        let files: ModelFiles =
            serde_json::from_str(r#"{"model_file": "encoder.onnx", "sample_rate": 24000}"#).unwrap();
        assert_eq!(files.model_file, "encoder.onnx");
        assert!(files.vocab_file.is_none());
        assert_eq!(ModelKind::Recognizer.default_companions(), ["vocab.json"]);
    }
}
