//! Per-language settings for Kokoro voices.
//!
//! Kokoro voice names start with a language letter and a gender letter
//! (`af_bella`, `bm_george`, `zf_xiaoxiao`). English and Chinese voices use
//! lexicon files shipped with the model; the rest rely on espeak-ng.

use std::path::Path;

/// How the engine should preprocess text for a given voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceProfile {
    pub language: &'static str,
    /// espeak-ng language code, empty when lexicons are used
    pub espeak_lang: &'static str,
    /// Lexicon file names inside the model directory
    pub lexicons: &'static [&'static str],
}

const AMERICAN: VoiceProfile = VoiceProfile { language: "American English", espeak_lang: "", lexicons: &["lexicon-us-en.txt"] };

impl VoiceProfile {
    /// Resolve the profile from a voice name. Unknown prefixes fall back to
    /// American English.
    pub fn for_voice(voice: &str) -> Self {
        let language = voice.chars().next().unwrap_or('a');
        match language {
            'b' => Self { language: "British English", espeak_lang: "", lexicons: &["lexicon-gb-en.txt"] },
            // Chinese with English fallback for mixed text
            'z' => Self { language: "Mandarin Chinese", espeak_lang: "", lexicons: &["lexicon-us-en.txt", "lexicon-zh.txt"] },
            'e' => Self::espeak("Spanish", "es"),
            'f' => Self::espeak("French", "fr"),
            'h' => Self::espeak("Hindi", "hi"),
            'i' => Self::espeak("Italian", "it"),
            'j' => Self::espeak("Japanese", "ja"),
            'p' => Self::espeak("Portuguese BR", "pt-br"),
            _ => AMERICAN,
        }
    }

    const fn espeak(language: &'static str, code: &'static str) -> Self {
        Self { language, espeak_lang: code, lexicons: &[] }
    }

    /// Comma-separated lexicon paths under `dir`, as sherpa-onnx expects.
    pub fn lexicon(&self, dir: &Path) -> String {
        self.lexicons.iter().map(|name| dir.join(name).to_string_lossy().to_string()).collect::<Vec<_>>().join(",")
    }
}
