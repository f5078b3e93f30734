//! Per-unit failure kinds.
//!
//! Batch stages never abort on a single unit: every per-unit operation returns
//! `Result<_, UnitError>` and the caller folds the outcome into a
//! [`BatchReport`](crate::report::BatchReport).

use thiserror::Error;

/// Why one unit (a recording, a chunk or a manifest candidate) was skipped.
#[derive(Debug, Error)]
pub enum UnitError {
    /// Corrupt or missing audio / text input.
    #[error("decode failed: {0:#}")]
    Decode(anyhow::Error),

    /// A speaker or chapter directory could not be listed.
    #[error("cannot list directory: {0:#}")]
    Listing(anyhow::Error),

    /// The recogniser or codec collaborator returned an error.
    #[error("model invocation failed: {0:#}")]
    Model(anyhow::Error),

    /// The artifact could not be written.
    #[error("write failed: {0:#}")]
    Write(anyhow::Error),

    /// The transcript file is empty or its first line is blank.
    #[error("empty transcript")]
    EmptyText,

    /// The phonemizer backend rejected the transcript.
    #[error(transparent)]
    Phonemize(#[from] PhonemizeError),

    /// The codec token matrix could not be loaded.
    #[error("load code failed: {0:#}")]
    CodeLoad(anyhow::Error),

    /// The phoneme file is missing, empty, or not exactly one line.
    #[error("load phone failed: {0}")]
    PhoneLoad(String),

    /// Token matrix channel count differs from the codec's quantizer count.
    #[error("code shape 1 is {got}, expected {expected}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("code shape is too short: {frames} frames < {min}")]
    TooShort { frames: usize, min: usize },

    #[error("code shape is too long: {frames} frames >= {max}")]
    TooLong { frames: usize, max: usize },
}

impl UnitError {
    /// Stable category name used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Listing(_) => "listing",
            Self::Model(_) => "model",
            Self::Write(_) => "write",
            Self::EmptyText => "empty_text",
            Self::Phonemize(_) => "phonemize",
            Self::CodeLoad(_) => "code_load",
            Self::PhoneLoad(_) => "phone_load",
            Self::ChannelMismatch { .. } => "channel_mismatch",
            Self::TooShort { .. } => "too_short",
            Self::TooLong { .. } => "too_long",
        }
    }
}

/// Failures raised while turning one transcript line into phoneme fields.
#[derive(Debug, Error)]
pub enum PhonemizeError {
    /// The backend was not compiled into this build.
    #[error("phonemizer backend '{0}' is not available in this build")]
    Unavailable(&'static str),

    /// The grapheme-to-phoneme engine itself failed.
    #[error("g2p engine: {0}")]
    Engine(String),

    /// Re-tokenised fields do not account for every character of the
    /// phonemized string.
    #[error("field length mismatch: fields cover {got} chars, phonemized string needs {expected}")]
    LengthMismatch { expected: usize, got: usize },

    /// The syllable backend met a reading it cannot split into initial/final.
    #[error("cannot decompose syllable {0:?}")]
    UnexpectedCharacter(String),

    /// Punctuation followed something other than a syllable separator.
    #[error("punctuation after {0:?}, expected a syllable separator")]
    SeparatorMisplaced(String),

    /// Input and output word counts differ under the `remove` policy.
    #[error("words count mismatch: {input} input words, {output} phonemized words")]
    WordsMismatch { input: usize, output: usize },

    /// The engine switched language under the `remove-utterance` policy.
    #[error("language switch detected: {0:?}")]
    LanguageSwitch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_for_manifest_rules() {
        let kinds = [
            UnitError::Listing(anyhow::anyhow!("x")).kind(),
            UnitError::CodeLoad(anyhow::anyhow!("x")).kind(),
            UnitError::PhoneLoad("x".into()).kind(),
            UnitError::ChannelMismatch { expected: 8, got: 7 }.kind(),
            UnitError::TooShort { frames: 1, min: 45 }.kind(),
            UnitError::TooLong { frames: 3000, max: 2250 }.kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn test_phonemize_error_converts() {
        let err: UnitError = PhonemizeError::Engine("boom".into()).into();
        assert_eq!(err.kind(), "phonemize");
        assert!(err.to_string().contains("boom"));
    }
}
