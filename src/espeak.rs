//! Grapheme-to-phoneme engine backed by the `libespeak-ng` C library.
//!
//! Calls the espeak-ng C API directly instead of spawning a subprocess.  The
//! output matches `espeak-ng -q --ipa --sep=_ -v <voice>`: phones joined by
//! `_`, words by spaces, one clause per call.
//!
//! ## Build requirements
//! | Platform             | Requirement                                    |
//! |----------------------|------------------------------------------------|
//! | Alpine / Linux       | `apk add espeak-ng-dev` / `apt install libespeak-ng-dev` |
//! | macOS (Homebrew)     | `brew install espeak-ng`                       |
//! | Custom build         | set `ESPEAK_LIB_DIR` at build time and pass the data directory to [`EspeakEngine::new`] |

use std::{
    ffi::{CStr, CString},
    os::raw::{c_char, c_int, c_void},
    path::Path,
    sync::Mutex,
};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::{error::PhonemizeError, phonemize::G2pEngine};

// ─── FFI bindings ─────────────────────────────────────────────────────────────
// Linking is handled by build.rs.

extern "C" {
    /// Set the directory that contains `espeak-ng-data/` (`NULL` = default).
    fn espeak_ng_InitializePath(path: *const c_char);

    /// Returns ENS_OK (0) on success.
    fn espeak_ng_Initialize(context: *mut c_void) -> c_int;

    /// Returns EE_OK (0) on success.
    fn espeak_ng_SetVoiceByName(name: *const c_char) -> c_int;

    /// Translate the clause at `*textptr`, advancing it (or setting it to
    /// `NULL` at the end).  The returned buffer is overwritten by the next call.
    fn espeak_TextToPhonemes(
        textptr: *mut *const c_void,
        textmode: c_int,
        phonememode: c_int,
    ) -> *const c_char;
}

/// `textmode`: input is UTF-8.
const CHARS_UTF8: c_int = 1;

/// `phonememode`: IPA output (bit 1), phone separator character in bits 8-15.
const PHONEMES_IPA_SEP: c_int = 0x02 | ((b'_' as c_int) << 8);

// ─── Global state ─────────────────────────────────────────────────────────────

/// espeak-ng keeps global state and is not thread-safe; every call goes
/// through this lock, which also remembers the selected voice.
static VOICE: Mutex<Option<String>> = Mutex::new(None);

/// Outcome of the one-time initialisation.
static INIT: OnceCell<Result<(), String>> = OnceCell::new();

fn do_init(data_path: Option<&Path>) -> Result<(), String> {
    let path_c = data_path
        .map(|p| CString::new(p.to_string_lossy().as_bytes()))
        .transpose()
        .map_err(|_| "espeak data path contains a null byte".to_string())?;
    let path_ptr: *const c_char = path_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

    unsafe {
        espeak_ng_InitializePath(path_ptr);
        let status = espeak_ng_Initialize(std::ptr::null_mut());
        if status != 0 {
            return Err(format!("espeak_ng_Initialize failed (status {:#010x})", status));
        }
    }
    Ok(())
}

/// Handle to the process-wide espeak-ng library.  Cheap to create; the library
/// is initialised by the first one.
#[derive(Debug)]
pub struct EspeakEngine {
    _priv: (),
}

impl EspeakEngine {
    /// Initialise espeak-ng, optionally from a non-default `espeak-ng-data/`
    /// location.  Only the first initialisation's path takes effect.
    pub fn new(data_path: Option<&Path>) -> Result<Self, PhonemizeError> {
        let _guard = VOICE.lock().unwrap_or_else(|p| p.into_inner());
        INIT.get_or_init(|| do_init(data_path))
            .as_ref()
            .map_err(|e| PhonemizeError::Engine(e.clone()))?;
        Ok(Self { _priv: () })
    }
}

impl G2pEngine for EspeakEngine {
    fn phones(&self, text: &str, language: &str) -> Result<String, PhonemizeError> {
        let mut voice = VOICE.lock().unwrap_or_else(|p| p.into_inner());

        if voice.as_deref() != Some(language) {
            let name = CString::new(language)
                .map_err(|_| PhonemizeError::Engine("voice name contains a null byte".into()))?;
            let rc = unsafe { espeak_ng_SetVoiceByName(name.as_ptr()) };
            if rc != 0 {
                return Err(PhonemizeError::Engine(format!(
                    "espeak_ng_SetVoiceByName({:?}) failed (rc {})",
                    language, rc
                )));
            }
            debug!(language, "espeak voice selected");
            *voice = Some(language.to_string());
        }

        let text_c = CString::new(text)
            .map_err(|_| PhonemizeError::Engine("text contains a null byte".into()))?;
        let mut current: *const c_void = text_c.as_ptr() as *const c_void;
        let mut parts: Vec<String> = Vec::new();

        unsafe {
            while !current.is_null() {
                let phonemes_ptr = espeak_TextToPhonemes(&mut current, CHARS_UTF8, PHONEMES_IPA_SEP);
                if phonemes_ptr.is_null() {
                    continue;
                }
                // Copy out before the next call overwrites the buffer.
                let chunk = CStr::from_ptr(phonemes_ptr)
                    .to_str()
                    .map_err(|_| PhonemizeError::Engine("espeak-ng returned non-UTF-8 phonemes".into()))?
                    .trim()
                    .to_owned();
                if !chunk.is_empty() {
                    parts.push(chunk);
                }
            }
        }

        Ok(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        phonemize::{Phonemizer, RuleBasedBackend, RuleBasedOptions},
        tokenize::{to_list, Separator},
    };

    #[test]
    fn test_phones_hello() {
        let engine = EspeakEngine::new(None).expect("espeak init");
        let raw = engine.phones("hello world", "en-us").expect("phonemize failed");
        assert_eq!(raw.split_whitespace().count(), 2, "unexpected output: {raw}");
        assert!(raw.contains('_'), "phones should be '_'-separated: {raw}");
    }

    #[test]
    fn test_rule_based_fields() {
        let backend = RuleBasedBackend::new(EspeakEngine::new(None).unwrap(), RuleBasedOptions::default())
            .unwrap();
        let sep = Separator::default();
        let s = backend.phonemize("Hello, world.", &sep).unwrap();
        assert!(s.contains(",_"), "{s}");
        assert!(s.ends_with('.'), "{s}");
        let fields = to_list(&s, &sep).unwrap();
        assert!(fields.contains(&"_".to_string()));
    }

    #[test]
    fn test_empty_text() {
        let engine = EspeakEngine::new(None).unwrap();
        assert!(engine.phones("", "en-us").unwrap().trim().is_empty());
    }
}
