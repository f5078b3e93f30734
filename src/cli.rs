//! CLI argument definitions using clap.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};

use crate::{
    codec::encode_corpus,
    download::{load_codec, load_recognizer},
    layout::ShardRange,
    manifest::{build_manifest, write_manifest, ManifestConfig},
    phonemize::{LanguageSwitch, WordsMismatch, DEFAULT_MARKS},
    report::BatchReport,
    segment::SegmentConfig,
    tokenize::{tokenize_corpus, Backend, Separator, TextTokenizer, TokenizerConfig},
    transcribe::transcribe_corpus,
};

#[derive(Debug, Parser)]
#[command(name = "corpusprep", version)]
#[command(about = "Prepare a speaker/chapter speech corpus for codec language-model training")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Split recordings on silence and transcribe every chunk
    Segment(SegmentArgs),

    /// Encode audio files into codec token matrices (.npy)
    Codec(CodecArgs),

    /// Convert transcripts (.txt) into phoneme sequences (.phone)
    Phonemize(PhonemizeArgs),

    /// Join tokens and phonemes into a filtered JSON training manifest
    Manifest(ManifestArgs),
}

/// Options shared by the per-unit stages.
#[derive(Debug, Args)]
pub struct StageArgs {
    /// Input root: <in-dir>/<speaker>/<chapter>/<unit>.<ext>
    #[arg(long, value_name = "DIR")]
    pub in_dir: PathBuf,

    /// Output root, mirrored from the input layout
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    /// First speaker (sorted index, inclusive)
    #[arg(long, default_value_t = 0)]
    pub spk_start: usize,

    /// Last speaker (sorted index, exclusive)
    #[arg(long, default_value_t = 100)]
    pub spk_end: usize,

    /// Write the batch report as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl StageArgs {
    fn shard(&self) -> ShardRange {
        ShardRange::new(self.spk_start, self.spk_end)
    }
}

#[derive(Debug, Args)]
pub struct SegmentArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Recogniser model directory or HuggingFace repo id
    #[arg(long, value_name = "MODEL")]
    pub asr_model: String,

    /// Execution device
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Minimum merged chunk length (ms)
    #[arg(long, default_value_t = 750)]
    pub export_chunk_len: u64,

    /// Minimum silence that splits a recording (ms)
    #[arg(long, default_value_t = 500)]
    pub min_silence_len: u64,

    /// Silence kept on each side of a segment (ms)
    #[arg(long, default_value_t = 500)]
    pub keep_silence: u64,

    /// Silence threshold below the recording's loudness (dB)
    #[arg(long, default_value_t = 14.0)]
    pub silence_offset_db: f64,
}

impl SegmentArgs {
    fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            min_silence_len: self.min_silence_len,
            keep_silence: self.keep_silence,
            export_chunk_len: self.export_chunk_len,
            silence_offset_db: self.silence_offset_db,
            ..SegmentConfig::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct CodecArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Codec model directory or HuggingFace repo id
    #[arg(long, value_name = "MODEL")]
    pub codec_model: String,

    /// Execution device
    #[arg(long, default_value = "cpu")]
    pub device: String,
}

#[derive(Debug, Args)]
pub struct PhonemizeArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    #[arg(long, value_enum, default_value_t = Backend::Espeak)]
    pub backend: Backend,

    /// espeak voice
    #[arg(long, default_value = "en-us")]
    pub language: String,

    /// Keep primary/secondary stress marks
    #[arg(long)]
    pub with_stress: bool,

    /// Drop punctuation instead of preserving it
    #[arg(long)]
    pub no_punctuation: bool,

    #[arg(long, value_enum, default_value_t = LanguageSwitch::KeepFlags)]
    pub language_switch: LanguageSwitch,

    #[arg(long, value_enum, default_value_t = WordsMismatch::Ignore)]
    pub words_mismatch: WordsMismatch,

    /// Directory containing espeak-ng-data/
    #[arg(long, value_name = "DIR")]
    pub espeak_data: Option<PathBuf>,
}

impl PhonemizeArgs {
    fn tokenizer_config(&self) -> TokenizerConfig {
        TokenizerConfig {
            backend: self.backend,
            language: self.language.clone(),
            separator: Separator::default(),
            preserve_punctuation: !self.no_punctuation,
            punctuation_marks: DEFAULT_MARKS.to_string(),
            with_stress: self.with_stress,
            language_switch: self.language_switch,
            words_mismatch: self.words_mismatch,
            espeak_data: self.espeak_data.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct ManifestArgs {
    /// Codec token root (.npy)
    #[arg(long, value_name = "DIR")]
    pub codec_dir: PathBuf,

    /// Phoneme root (.phone)
    #[arg(long, value_name = "DIR")]
    pub phone_dir: PathBuf,

    /// Value of every record's Dataset field
    #[arg(long)]
    pub dataset: String,

    /// Expected token matrix columns
    #[arg(long, default_value_t = 8)]
    pub channels: usize,

    /// Minimum frames (inclusive)
    #[arg(long, default_value_t = 45)]
    pub min_frames: usize,

    /// Maximum frames (exclusive)
    #[arg(long, default_value_t = 2250)]
    pub max_frames: usize,

    /// Manifest JSON path
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 0)]
    pub spk_start: usize,

    /// Unbounded when omitted
    #[arg(long)]
    pub spk_end: Option<usize>,

    /// Write the batch report as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl ManifestArgs {
    fn manifest_config(&self) -> ManifestConfig {
        ManifestConfig {
            dataset: self.dataset.clone(),
            channels: self.channels,
            min_frames: self.min_frames,
            max_frames: self.max_frames,
        }
    }
}

/// Only the CPU execution provider is built in.
fn check_device(device: &str) {
    if !device.eq_ignore_ascii_case("cpu") {
        warn!(device, "only the CPU execution provider is available, falling back to cpu");
    }
}

fn finish(report: &BatchReport, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        report.write_json(path)?;
    }
    Ok(())
}

/// Execute CLI command - separated for testing.
pub fn run(cli: Cli) -> Result<()> {
    debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Segment(args) => {
            check_device(&args.device);
            let recognizer = load_recognizer(&args.asr_model)?;
            let report = transcribe_corpus(
                &recognizer,
                &args.stage.in_dir,
                &args.stage.out_dir,
                &args.segment_config(),
                args.stage.shard(),
            )?;
            finish(&report, args.stage.report.as_deref())
        }
        Commands::Codec(args) => {
            check_device(&args.device);
            let codec = load_codec(&args.codec_model)?;
            let report =
                encode_corpus(&codec, &args.stage.in_dir, &args.stage.out_dir, args.stage.shard())?;
            finish(&report, args.stage.report.as_deref())
        }
        Commands::Phonemize(args) => {
            let tokenizer = TextTokenizer::new(&args.tokenizer_config())?;
            let report = tokenize_corpus(
                &tokenizer,
                &args.stage.in_dir,
                &args.stage.out_dir,
                args.stage.shard(),
            )?;
            finish(&report, args.stage.report.as_deref())
        }
        Commands::Manifest(args) => {
            let shard = ShardRange::new(args.spk_start, args.spk_end.unwrap_or(usize::MAX));
            let (records, report) =
                build_manifest(&args.codec_dir, &args.phone_dir, &args.manifest_config(), shard)?;
            write_manifest(&records, &args.output)?;
            finish(&report, args.report.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segment_defaults() {
        let cli = Cli::parse_from([
            "corpusprep", "segment", "--in-dir", "raw", "--out-dir", "chunks", "--asr-model", "models/asr",
        ]);
        match &cli.command {
            Commands::Segment(args) => {
                assert_eq!(args.stage.in_dir, Path::new("raw"));
                assert_eq!(args.stage.shard(), ShardRange::new(0, 100));
                assert_eq!(args.device, "cpu");
                let cfg = args.segment_config();
                assert_eq!(cfg.export_chunk_len, 750);
                assert_eq!(cfg.min_silence_len, 500);
                assert_eq!(cfg.keep_silence, 500);
                assert!((cfg.silence_offset_db - 14.0).abs() < 1e-9);
                assert!(args.stage.report.is_none());
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_shard_and_report() {
        let cli = Cli::parse_from([
            "corpusprep", "codec", "--in-dir", "a", "--out-dir", "b", "--codec-model", "m",
            "--spk-start", "100", "--spk-end", "200", "--report", "r.json", "--device", "cuda:0",
        ]);
        match &cli.command {
            Commands::Codec(CodecArgs { stage, codec_model, device }) => {
                assert_eq!(stage.shard(), ShardRange::new(100, 200));
                assert_eq!(stage.report.as_deref(), Some(Path::new("r.json")));
                assert_eq!(codec_model, "m");
                assert_eq!(device, "cuda:0");
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_phonemize_options() {
        let cli = Cli::parse_from([
            "corpusprep", "phonemize", "--in-dir", "a", "--out-dir", "b",
            "--backend", "pypinyin-initials-finals", "--with-stress", "--no-punctuation",
            "--language-switch", "remove-flags", "--words-mismatch", "warn",
        ]);
        match &cli.command {
            Commands::Phonemize(args) => {
                let cfg = args.tokenizer_config();
                assert_eq!(cfg.backend, Backend::PypinyinInitialsFinals);
                assert!(cfg.with_stress);
                assert!(!cfg.preserve_punctuation);
                assert_eq!(cfg.language_switch, LanguageSwitch::RemoveFlags);
                assert_eq!(cfg.words_mismatch, WordsMismatch::Warn);
                assert_eq!(cfg.language, "en-us");
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_manifest_defaults() {
        let cli = Cli::parse_from([
            "corpusprep", "manifest", "--codec-dir", "c", "--phone-dir", "p", "--dataset", "small",
            "-o", "train.json",
        ]);
        match &cli.command {
            Commands::Manifest(args) => {
                let cfg = args.manifest_config();
                assert_eq!((cfg.channels, cfg.min_frames, cfg.max_frames), (8, 45, 2250));
                assert_eq!(args.spk_end, None);
                assert_eq!(args.output, Path::new("train.json"));
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn rejects_unknown_backend() {
        let res = Cli::try_parse_from([
            "corpusprep", "phonemize", "--in-dir", "a", "--out-dir", "b", "--backend", "g2pw",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn run_manifest_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let codec = dir.path().join("codec");
        let phone = dir.path().join("phone");
        let m = crate::codec::TokenMatrix::new(60, 8, vec![3; 480]).unwrap();
        crate::layout::write_atomic(&codec.join("s").join("c").join("u.npy"), &m.to_npy().unwrap()).unwrap();
        crate::layout::write_atomic(&phone.join("s").join("c").join("u.phone"), b"a b").unwrap();
        let out = dir.path().join("train.json");
        let report = dir.path().join("report.json");

        run(Cli::parse_from([
            "corpusprep",
            "manifest",
            "--codec-dir",
            codec.to_str().unwrap(),
            "--phone-dir",
            phone.to_str().unwrap(),
            "--dataset",
            "small",
            "--output",
            out.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ]))
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(value[0]["Tokens"], 60);
        assert!(report.exists());
    }
}
