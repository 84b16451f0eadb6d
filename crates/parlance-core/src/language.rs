//! Language profiles for inbound and outbound calls.
//!
//! Each `(language, direction)` pair supplies the opening greeting, the
//! system-prompt preamble, and the transcriber/synthesizer locale settings.
//! A profile is selected once at session creation and stays fixed for the
//! life of the call.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Supported conversation languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Kr,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Kr => "kr",
        }
    }

    /// Parses a language code ("en" or "kr"). Unknown codes are an error so
    /// a typo in the phonebook or environment is caught loudly.
    pub fn parse(code: &str) -> CoreResult<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "kr" => Ok(Language::Kr),
            other => Err(CoreError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Whether the call was received or placed by us. Outbound calls open with a
/// different greeting than inbound ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    #[default]
    Inbound,
    Outbound,
}

/// Locale bundle for one `(language, direction)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Spoken before the first user turn.
    pub greeting: String,
    /// Prepended to every skill's system prompt for this session.
    pub prompt_preamble: String,
    /// Locale code handed to the speech-to-text service.
    pub transcriber_locale: String,
    /// Locale code handed to the text-to-speech service.
    pub synthesizer_locale: String,
    /// Voice identifier handed to the text-to-speech service.
    pub synthesizer_voice: String,
}

/// Returns the locale bundle for the given language and call direction.
pub fn profile_for(language: Language, direction: CallDirection) -> LanguageProfile {
    match (language, direction) {
        (Language::En, CallDirection::Inbound) => LanguageProfile {
            greeting: "Welcome to Meridian Financial. How can I assist you today?".to_string(),
            prompt_preamble: String::new(),
            transcriber_locale: "en-US".to_string(),
            synthesizer_locale: "en-US".to_string(),
            synthesizer_voice: "en-US-AriaNeural".to_string(),
        },
        (Language::En, CallDirection::Outbound) => LanguageProfile {
            greeting: "Hello, this call is from Meridian Financial. I am calling to assist you with processing your payment.".to_string(),
            prompt_preamble: String::new(),
            transcriber_locale: "en-US".to_string(),
            synthesizer_locale: "en-US".to_string(),
            synthesizer_voice: "en-US-AriaNeural".to_string(),
        },
        (Language::Kr, CallDirection::Inbound) => LanguageProfile {
            greeting: "안녕하세요 메리디안 금융입니다. 무엇을 도와드릴까요?".to_string(),
            prompt_preamble: "당신은 한국말 도우미 입니다.".to_string(),
            transcriber_locale: "ko-KR".to_string(),
            synthesizer_locale: "ko-KR".to_string(),
            synthesizer_voice: "ko-KR-SunHiNeural".to_string(),
        },
        (Language::Kr, CallDirection::Outbound) => LanguageProfile {
            greeting: "안녕하세요 메리디안 금융에서 전화드립니다. 고객님의 결제를 도와드리려 합니다.".to_string(),
            prompt_preamble: "당신은 한국말 도우미 입니다.".to_string(),
            transcriber_locale: "ko-KR".to_string(),
            synthesizer_locale: "ko-KR".to_string(),
            synthesizer_voice: "ko-KR-SunHiNeural".to_string(),
        },
    }
}
