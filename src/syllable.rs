//! Syllable phonemizer for Mandarin.
//!
//! Each Han character is read as a tone-numbered pinyin syllable (`hao3`,
//! neutral tone `5`, `ü` written `v`).  Runs of other characters are read as
//! one unit.  In [`SyllableMode::InitialsFinals`] a syllable is split into its
//! initial consonant cluster and its final: `h|ao3`.

use ::pinyin::ToPinyin;

use crate::{error::PhonemizeError, phonemize::Phonemizer, tokenize::Separator};

/// Added to the configured marks: these never carry a reading.
const CJK_MARKS: &str = "，。！？；：、（）《》【】「」『』“”‘’…—～·";

/// Longest-prefix order matters: `zh` before `z`.
const INITIALS: [&str; 23] = [
    "b", "p", "m", "f", "d", "t", "n", "l", "g", "k", "h", "j", "q", "x", "zh", "ch", "sh", "r",
    "z", "c", "s", "y", "w",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyllableMode {
    /// `ni3-hao3`
    Plain,
    /// `n|i3-h|ao3`
    InitialsFinals,
}

pub struct PinyinBackend {
    mode: SyllableMode,
    marks: String,
}

impl PinyinBackend {
    pub fn new(mode: SyllableMode, punctuation_marks: &str) -> Self {
        Self { mode, marks: format!("{}{}", punctuation_marks, CJK_MARKS) }
    }

    fn is_punctuation(&self, reading: &str, sep: &Separator) -> bool {
        reading.chars().all(|c| self.marks.contains(c) || sep.word.contains(c))
    }
}

/// `lü4` → `lv4`, `de` → `de5`.
fn tone_numbered(raw: &str) -> String {
    let mut reading = raw.replace('ü', "v");
    if !reading.ends_with(|c: char| c.is_ascii_digit()) {
        reading.push('5');
    }
    reading
}

/// Tone-numbered reading of one Han character, if it has one.
fn han_reading(c: char) -> Option<String> {
    c.to_pinyin().map(|py| tone_numbered(py.with_tone_num_end()))
}

/// One reading per Han character; other characters are grouped into runs.
pub fn readings(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut run = String::new();
    for c in text.chars() {
        match han_reading(c) {
            Some(reading) => {
                if !run.is_empty() {
                    out.push(std::mem::take(&mut run));
                }
                out.push(reading);
            }
            None => run.push(c),
        }
    }
    if !run.is_empty() {
        out.push(run);
    }
    out
}

/// Split a reading into (initial, final).  The initial may be empty.
pub fn split_syllable(reading: &str) -> (&str, &str) {
    let initial = INITIALS
        .iter()
        .filter(|i| reading.starts_with(*i))
        .max_by_key(|i| i.len())
        .copied()
        .unwrap_or("");
    reading.split_at(initial.len())
}

impl Phonemizer for PinyinBackend {
    fn phonemize(&self, text: &str, sep: &Separator) -> Result<String, PhonemizeError> {
        let text = text.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(sep.word.as_str());

        let mut phones: Vec<String> = Vec::new();
        for reading in readings(&text) {
            if self.is_punctuation(&reading, sep) {
                if let Some(last) = phones.last() {
                    if *last != sep.syllable {
                        return Err(PhonemizeError::SeparatorMisplaced(reading));
                    }
                    phones.pop();
                }
                phones.extend(reading.chars().map(String::from));
                continue;
            }
            match self.mode {
                SyllableMode::Plain => phones.extend([reading, sep.syllable.clone()]),
                SyllableMode::InitialsFinals => {
                    if !reading.ends_with(char::is_alphanumeric) {
                        return Err(PhonemizeError::UnexpectedCharacter(reading));
                    }
                    let (initial, fin) = split_syllable(&reading);
                    phones.extend([
                        initial.to_string(),
                        sep.phone.clone(),
                        fin.to_string(),
                        sep.syllable.clone(),
                    ]);
                }
            }
        }

        let joined = phones.concat();
        let trim: Vec<char> = sep.word.chars().chain(sep.syllable.chars()).collect();
        Ok(joined.trim_end_matches(trim.as_slice()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{phonemize::DEFAULT_MARKS, tokenize::to_list};

    fn plain() -> PinyinBackend {
        PinyinBackend::new(SyllableMode::Plain, DEFAULT_MARKS)
    }

    fn initials_finals() -> PinyinBackend {
        PinyinBackend::new(SyllableMode::InitialsFinals, DEFAULT_MARKS)
    }

    fn sep() -> Separator {
        Separator::default()
    }

    #[test]
    fn test_readings() {
        assert_eq!(readings("你好"), ["ni3", "hao3"]);
        assert_eq!(readings("女"), ["nv3"]);
        assert_eq!(readings("AI芯片"), ["AI", "xin1", "pian4"]);
        assert_eq!(readings("好，_家"), ["hao3", "，_", "jia1"]);
    }

    #[test]
    fn test_tone_numbered() {
        assert_eq!(tone_numbered("de"), "de5");
        assert_eq!(tone_numbered("lü4"), "lv4");
        assert_eq!(tone_numbered("hao3"), "hao3");
    }

    #[test]
    fn test_split_syllable() {
        assert_eq!(split_syllable("zhong1"), ("zh", "ong1"));
        assert_eq!(split_syllable("zi4"), ("z", "i4"));
        assert_eq!(split_syllable("yi1"), ("y", "i1"));
        assert_eq!(split_syllable("er2"), ("", "er2"));
    }

    #[test]
    fn test_plain_mode() {
        assert_eq!(plain().phonemize("你好 世界", &sep()).unwrap(), "ni3-hao3_shi4-jie4");
    }

    #[test]
    fn test_initials_finals_mode() {
        assert_eq!(initials_finals().phonemize("你好", &sep()).unwrap(), "n|i3-h|ao3");
        assert_eq!(initials_finals().phonemize("中文", &sep()).unwrap(), "zh|ong1-w|en2");
    }

    #[test]
    fn test_punctuation_replaces_separator() {
        assert_eq!(plain().phonemize("你好，世界。", &sep()).unwrap(), "ni3-hao3，shi4-jie4。");
        assert_eq!(plain().phonemize("好, 家?", &sep()).unwrap(), "hao3,_jia1?");
    }

    #[test]
    fn test_spaces_collapse_to_one_word_separator() {
        assert_eq!(plain().phonemize("你   好", &sep()).unwrap(), "ni3_hao3");
    }

    #[test]
    fn test_latin_run_has_empty_initial() {
        assert_eq!(initials_finals().phonemize("中AI", &sep()).unwrap(), "zh|ong1-|AI");
    }

    #[test]
    fn test_unexpected_character() {
        let err = initials_finals().phonemize("好+", &sep()).unwrap_err();
        assert!(matches!(err, PhonemizeError::UnexpectedCharacter(ref r) if r == "+"), "{err}");
        assert!(plain().phonemize("好+", &sep()).is_ok());
    }

    #[test]
    fn test_fields_account_for_every_character() {
        for text in ["你好 世界", "你好，世界。", "中文AI模型"] {
            let s = initials_finals().phonemize(text, &sep()).unwrap();
            assert!(to_list(&s, &sep()).is_ok(), "{text} -> {s}");
        }
    }
}
