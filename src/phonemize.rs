//! Rule-based multilingual phonemizer.
//!
//! [`RuleBasedBackend`] wraps a grapheme-to-phoneme engine (libespeak-ng in
//! production, see the `espeak` module) and shapes its raw output:
//!
//! 1. punctuation marks are cut out of the text before the engine sees it and
//!    restored afterwards, so `Hello, world.` becomes `h|ə|l|oʊ,_w|ɜː|l|d.`;
//! 2. stress marks are dropped unless requested;
//! 3. language-switch flags such as `(fr)` are kept, removed, or reject the
//!    utterance;
//! 4. input and output word counts are compared per chunk.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::{error::PhonemizeError, tokenize::Separator};

/// Punctuation preserved by default.
pub const DEFAULT_MARKS: &str = ";:,.!?¡¿—…\"«»“”(){}[]";

const STRESS_MARKS: [char; 2] = ['ˈ', 'ˌ'];

static RE_LANG_FLAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.+?\)").unwrap());
static RE_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// A text-to-phoneme-string backend.
pub trait Phonemizer: Send + Sync {
    /// Render one line with `separator`'s word / syllable / phone markers.
    fn phonemize(&self, text: &str, separator: &Separator) -> Result<String, PhonemizeError>;
}

/// The engine behind [`RuleBasedBackend`].
pub trait G2pEngine: Send + Sync {
    /// Phonemes for punctuation-free `text` in `language`: words separated by
    /// spaces, phones inside a word by `_`.  Language switches are announced
    /// inline as `(lang)`.
    fn phones(&self, text: &str, language: &str) -> Result<String, PhonemizeError>;
}

/// What to do when the engine switches language mid-utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LanguageSwitch {
    #[default]
    KeepFlags,
    RemoveFlags,
    RemoveUtterance,
}

/// What to do when the phonemized word count differs from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum WordsMismatch {
    #[default]
    Ignore,
    Warn,
    Remove,
}

#[derive(Debug, Clone)]
pub struct RuleBasedOptions {
    pub language: String,
    pub preserve_punctuation: bool,
    pub punctuation_marks: String,
    pub with_stress: bool,
    pub language_switch: LanguageSwitch,
    pub words_mismatch: WordsMismatch,
}

impl Default for RuleBasedOptions {
    fn default() -> Self {
        Self {
            language: "en-us".into(),
            preserve_punctuation: true,
            punctuation_marks: DEFAULT_MARKS.into(),
            with_stress: false,
            language_switch: LanguageSwitch::KeepFlags,
            words_mismatch: WordsMismatch::Ignore,
        }
    }
}

pub struct RuleBasedBackend<E> {
    engine: E,
    options: RuleBasedOptions,
    /// Runs of marks with their surrounding whitespace.
    marks: Regex,
}

impl<E: G2pEngine> RuleBasedBackend<E> {
    pub fn new(engine: E, options: RuleBasedOptions) -> Result<Self, PhonemizeError> {
        let class: String = options.punctuation_marks.chars().map(|c| regex::escape(&c.to_string())).collect();
        let marks = if class.is_empty() {
            // Matches nothing.
            Regex::new(r"[^\s\S]")
        } else {
            Regex::new(&format!(r"(?:\s*[{}]+\s*)+", class))
        }
        .map_err(|e| PhonemizeError::Engine(format!("invalid punctuation marks: {}", e)))?;
        Ok(Self { engine, options, marks })
    }

    pub fn options(&self) -> &RuleBasedOptions {
        &self.options
    }

    fn apply_language_switch(&self, line: &str) -> Result<String, PhonemizeError> {
        if !RE_LANG_FLAG.is_match(line) {
            return Ok(line.to_string());
        }
        match self.options.language_switch {
            LanguageSwitch::KeepFlags => Ok(line.to_string()),
            LanguageSwitch::RemoveFlags => Ok(RE_LANG_FLAG.replace_all(line, "").into_owned()),
            LanguageSwitch::RemoveUtterance => Err(PhonemizeError::LanguageSwitch(line.to_string())),
        }
    }

    /// Phonemize a punctuation-free chunk into `sep` notation.
    fn phonemize_chunk(&self, chunk: &str, sep: &Separator) -> Result<String, PhonemizeError> {
        let raw = self.engine.phones(chunk, &self.options.language)?;

        let line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let line = RE_UNDERSCORES.replace_all(&line, "_").replace("_ ", " ");
        let line = self.apply_language_switch(&line)?;

        let mut words = Vec::new();
        for word in line.split_whitespace() {
            let word = if self.options.with_stress {
                word.to_string()
            } else {
                word.replace(STRESS_MARKS, "")
            };
            let phones: Vec<&str> = word.split('_').filter(|p| !p.is_empty()).collect();
            if !phones.is_empty() {
                words.push(phones.join(sep.phone.as_str()));
            }
        }

        let input = chunk.split_whitespace().count();
        if words.len() != input {
            match self.options.words_mismatch {
                WordsMismatch::Ignore => {}
                WordsMismatch::Warn => {
                    warn!(input, output = words.len(), text = chunk, "words count mismatch")
                }
                WordsMismatch::Remove => {
                    return Err(PhonemizeError::WordsMismatch { input, output: words.len() })
                }
            }
        }
        Ok(words.join(sep.word.as_str()))
    }
}

/// Whitespace runs around and between marks become word separators.
fn mark_with_boundaries(mark: &str, word_sep: &str) -> String {
    let mut out = String::new();
    let mut in_space = false;
    for c in mark.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push_str(word_sep);
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

impl<E: G2pEngine> Phonemizer for RuleBasedBackend<E> {
    fn phonemize(&self, text: &str, sep: &Separator) -> Result<String, PhonemizeError> {
        let text = text.trim();
        if !self.options.preserve_punctuation {
            let stripped = self.marks.replace_all(text, " ");
            return self.phonemize_chunk(stripped.trim(), sep);
        }

        let mut out = String::new();
        let mut last = 0;
        for m in self.marks.find_iter(text) {
            let chunk = text[last..m.start()].trim();
            if !chunk.is_empty() {
                out.push_str(&self.phonemize_chunk(chunk, sep)?);
            }
            out.push_str(&mark_with_boundaries(m.as_str(), &sep.word));
            last = m.end();
        }
        let tail = text[last..].trim();
        if !tail.is_empty() {
            out.push_str(&self.phonemize_chunk(tail, sep)?);
        }
        Ok(out)
    }
}
