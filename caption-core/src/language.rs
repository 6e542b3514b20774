//! Language codes accepted by transcription requests.
//!
//! The engine itself only understands base ISO codes plus `auto`. The two
//! Chinese variants exist purely on our side: each rewrites to the base `zh`
//! code and injects a fixed register prompt that steers the decoder toward
//! the matching writing system. The substitution happens before the native
//! call and is never visible to the caller.

use serde::{Deserialize, Serialize};

/// Decoding prompt injected for the simplified-register Chinese variant.
pub(crate) const PROMPT_SIMPLIFIED: &str = "以下是普通话的句子。";

/// Decoding prompt injected for the traditional-register Chinese variant.
pub(crate) const PROMPT_TRADITIONAL: &str = "以下是普通話的句子。";

/// Supported request languages.
///
/// The set is closed by design — the surrounding application exposes exactly
/// this list in its UI, and the native layer has only been validated against
/// these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    /// Let the engine detect the language.
    Auto,
    En,
    Ja,
    Ko,
    /// Cantonese.
    Yue,
    /// Mandarin, script left as the engine produced it.
    Zh,
    /// Mandarin, output converted to simplified characters.
    ZhHans,
    /// Mandarin, output converted to traditional (Taiwan) characters.
    ZhHant,
}

impl Language {
    /// The code actually sent to the engine. Chinese variants collapse to
    /// the base `zh` code.
    pub fn engine_code(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::En => "en",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Yue => "yue",
            Language::Zh | Language::ZhHans | Language::ZhHant => "zh",
        }
    }

    /// Fixed register prompt for the Chinese variants. When present it
    /// replaces any caller-supplied prompt.
    pub(crate) fn register_prompt(self) -> Option<&'static str> {
        match self {
            Language::ZhHans => Some(PROMPT_SIMPLIFIED),
            Language::ZhHant => Some(PROMPT_TRADITIONAL),
            _ => None,
        }
    }

    /// Whether post-processing must run script conversion on segment text.
    pub fn needs_script_conversion(self) -> bool {
        matches!(self, Language::ZhHans | Language::ZhHant)
    }

    /// The prompt the engine will see: the variant's fixed register prompt
    /// when one exists, otherwise the caller's.
    pub(crate) fn effective_prompt(self, caller_prompt: Option<&str>) -> Option<String> {
        self.register_prompt()
            .map(str::to_owned)
            .or_else(|| caller_prompt.map(str::to_owned))
    }
}
