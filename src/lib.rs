//! # corpusprep
//!
//! Speech corpus preparation for codec language-model training.  Long-form
//! recordings laid out as `root/<speaker>/<chapter>/<recording>.wav` become
//! short chunks, each with a transcript, a phoneme sequence and a codec token
//! matrix; a final pass joins and filters them into a JSON manifest.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use corpusprep::{download, layout::ShardRange, segment::SegmentConfig, transcribe};
//!
//! let asr = download::load_recognizer("models/wav2vec2-ctc").unwrap();
//! let report = transcribe::transcribe_corpus(
//!     &asr,
//!     Path::new("raw"),
//!     Path::new("chunks"),
//!     &SegmentConfig::default(),
//!     ShardRange::ALL,
//! )
//! .unwrap();
//! assert!(report.is_clean());
//! ```
//!
//! ## Pipeline
//! 1. **Segment**: split on silence relative to the recording's loudness,
//!    greedily merge into chunks of at least 750 ms ([`segment`]).
//! 2. **Transcribe**: CTC recogniser per chunk, `.txt` ([`transcribe`]).
//! 3. **Codec**: EnCodec-style token matrix per file, `.npy` ([`codec`]).
//! 4. **Phonemize**: rule-based or pinyin backend, `.phone` ([`tokenize`]).
//! 5. **Manifest**: join, validate, filter ([`manifest`]).
//!
//! Every stage skips units whose output already exists, so a batch can be
//! rerun after interruption, and reports per-unit failures in a
//! [`BatchReport`] instead of aborting.
//!
//! ## Build requirements
//! | Feature   | Requirement                                               |
//! |-----------|-----------------------------------------------------------|
//! | `espeak`  | `apk add espeak-ng-dev` / `apt install libespeak-ng-dev` / `brew install espeak-ng` |

pub mod asr;
pub mod audio;
pub mod codec;
pub mod download;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod npy;
pub mod phonemize;
pub mod report;
pub mod segment;
pub mod syllable;
pub mod tokenize;
pub mod transcribe;

#[cfg(feature = "espeak")]
pub mod espeak;

#[cfg(feature = "cli")]
pub mod cli;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use error::{PhonemizeError, UnitError};
pub use report::{BatchReport, UnitOutcome};
pub use tokenize::{Separator, TextTokenizer};
