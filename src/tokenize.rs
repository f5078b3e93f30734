//! Transcript → phoneme field list, and the `.txt` → `.phone` stage.
//!
//! A backend renders one line as a string using three separators (word,
//! syllable, phone).  [`to_list`] re-tokenises that string into flat fields:
//! word characters runs and single punctuation symbols, phone separators
//! dropped, one word marker between consecutive words.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::{
    error::{PhonemizeError, UnitError},
    layout::{self, ShardRange, PHONE_EXT, TXT_EXT},
    phonemize::{LanguageSwitch, Phonemizer, WordsMismatch, DEFAULT_MARKS},
    report::{BatchReport, UnitOutcome},
    syllable::{PinyinBackend, SyllableMode},
};

/// Python's `\w+|[^\w\s]`.  Python word characters are letters, numbers and
/// `_`; unlike the `regex` crate's `\w` they exclude combining marks, so a
/// diacritic such as U+0303 becomes a field of its own.
static RE_FIELDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+|[^\p{L}\p{N}_\s]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Separator {
    pub word: String,
    pub syllable: String,
    pub phone: String,
}

impl Default for Separator {
    fn default() -> Self {
        Self { word: "_".into(), syllable: "-".into(), phone: "|".into() }
    }
}

/// Split a backend's phoneme string into fields.
///
/// The fields, concatenated with the word markers, must account for every
/// character of `phonemized` except the phone separators; anything else means
/// the backend emitted characters the field pattern cannot see (whitespace,
/// for instance) and is reported as [`PhonemizeError::LengthMismatch`].
pub fn to_list(phonemized: &str, sep: &Separator) -> Result<Vec<String>, PhonemizeError> {
    let words: Vec<&str> = if sep.word.is_empty() {
        vec![phonemized]
    } else {
        phonemized.split(sep.word.as_str()).collect()
    };

    let mut fields = Vec::new();
    for word in words {
        fields.extend(
            RE_FIELDS
                .find_iter(word)
                .map(|m| m.as_str())
                .filter(|&p| p != sep.phone)
                .map(str::to_string),
        );
        fields.push(sep.word.clone());
    }
    fields.pop();

    let got: usize = fields.iter().map(|f| f.chars().count()).sum();
    let phones = if sep.phone.is_empty() { 0 } else { phonemized.matches(sep.phone.as_str()).count() };
    let expected = phonemized.chars().count() - phones;
    if got != expected {
        return Err(PhonemizeError::LengthMismatch { expected, got });
    }
    Ok(fields)
}

/// Which [`Phonemizer`] implementation a [`TextTokenizer`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Backend {
    /// Rule-based multilingual grapheme-to-phoneme (libespeak-ng).
    #[default]
    Espeak,
    /// Tone-numbered Mandarin syllables, `ni3-hao3`.
    Pypinyin,
    /// Mandarin initials and finals, `n|i3-h|ao3`.
    PypinyinInitialsFinals,
}

#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    pub backend: Backend,
    /// espeak voice name.
    pub language: String,
    pub separator: Separator,
    pub preserve_punctuation: bool,
    pub punctuation_marks: String,
    pub with_stress: bool,
    pub language_switch: LanguageSwitch,
    pub words_mismatch: WordsMismatch,
    /// Directory holding `espeak-ng-data/`; the library default when unset.
    pub espeak_data: Option<std::path::PathBuf>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Espeak,
            language: "en-us".into(),
            separator: Separator::default(),
            preserve_punctuation: true,
            punctuation_marks: DEFAULT_MARKS.into(),
            with_stress: false,
            language_switch: LanguageSwitch::KeepFlags,
            words_mismatch: WordsMismatch::Ignore,
            espeak_data: None,
        }
    }
}

impl TokenizerConfig {
    #[cfg(feature = "espeak")]
    fn rule_based_options(&self) -> crate::phonemize::RuleBasedOptions {
        crate::phonemize::RuleBasedOptions {
            language: self.language.clone(),
            preserve_punctuation: self.preserve_punctuation,
            punctuation_marks: self.punctuation_marks.clone(),
            with_stress: self.with_stress,
            language_switch: self.language_switch,
            words_mismatch: self.words_mismatch,
        }
    }
}

/// One transcript line in, one field list out.
pub struct TextTokenizer {
    backend: Box<dyn Phonemizer>,
    separator: Separator,
}

impl TextTokenizer {
    pub fn new(config: &TokenizerConfig) -> Result<Self, PhonemizeError> {
        let backend: Box<dyn Phonemizer> = match config.backend {
            Backend::Espeak => espeak_backend(config)?,
            Backend::Pypinyin => Box::new(PinyinBackend::new(
                SyllableMode::Plain,
                &config.punctuation_marks,
            )),
            Backend::PypinyinInitialsFinals => Box::new(PinyinBackend::new(
                SyllableMode::InitialsFinals,
                &config.punctuation_marks,
            )),
        };
        Ok(Self::with_backend(backend, config.separator.clone()))
    }

    pub fn with_backend(backend: Box<dyn Phonemizer>, separator: Separator) -> Self {
        Self { backend, separator }
    }

    pub fn separator(&self) -> &Separator {
        &self.separator
    }

    pub fn phonemize(&self, text: &str) -> Result<Vec<String>, PhonemizeError> {
        let phonemized = self.backend.phonemize(text.trim(), &self.separator)?;
        to_list(&phonemized, &self.separator)
    }
}

#[cfg(feature = "espeak")]
fn espeak_backend(config: &TokenizerConfig) -> Result<Box<dyn Phonemizer>, PhonemizeError> {
    use crate::{espeak::EspeakEngine, phonemize::RuleBasedBackend};

    let engine = EspeakEngine::new(config.espeak_data.as_deref())?;
    let backend = RuleBasedBackend::new(engine, config.rule_based_options())?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "espeak"))]
fn espeak_backend(_config: &TokenizerConfig) -> Result<Box<dyn Phonemizer>, PhonemizeError> {
    Err(PhonemizeError::Unavailable("espeak"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage
// ─────────────────────────────────────────────────────────────────────────────

/// Phonemize the first line of `txt_path` into a single space-joined line.
pub fn phonemize_unit(
    tokenizer: &TextTokenizer,
    txt_path: &Path,
    phone_path: &Path,
) -> Result<UnitOutcome, UnitError> {
    if phone_path.exists() {
        return Ok(UnitOutcome::Existing);
    }
    let text = std::fs::read_to_string(txt_path)
        .with_context(|| format!("Cannot read transcript: {}", txt_path.display()))
        .map_err(UnitError::Decode)?;
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(UnitError::EmptyText);
    }
    let fields = tokenizer.phonemize(line)?;
    layout::write_atomic(phone_path, fields.join(" ").as_bytes()).map_err(UnitError::Write)?;
    Ok(UnitOutcome::Written)
}

/// Phonemize every `.txt` under `in_dir` into `out_dir/<spk>/<chapter>/<uid>.phone`.
pub fn tokenize_corpus(
    tokenizer: &TextTokenizer,
    in_dir: &Path,
    out_dir: &Path,
    shard: ShardRange,
) -> Result<BatchReport> {
    let mut report = BatchReport::new("phonemize");
    for chapter in layout::chapters(in_dir, shard, &mut report)? {
        info!(speaker = %chapter.speaker, chapter = %chapter.chapter, "phonemizing chapter");
        for (uid, txt_path) in layout::chapter_units(&chapter, TXT_EXT, &mut report) {
            let key = chapter.unit(&uid);
            let phone_path = key.path(out_dir, PHONE_EXT);
            report.record(&key, phonemize_unit(tokenizer, &txt_path, &phone_path));
        }
    }
    report.log_summary();
    Ok(report)
}
