//! Runtime settings loaded from the environment, with an optional
//! `parlance.toml` overlay for deployments that cannot set env vars.
//!
//! Settings are an explicit value threaded through every orchestration call.
//! There is no process-wide singleton; construct once at startup and pass by
//! reference.

use crate::error::{CoreError, CoreResult};
use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Runtime settings for one deployment.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | PARLANCE_CLIENT_NAME | default | Selects which dialog graph build to use. |
/// | PARLANCE_BASE_URL | (unset) | Public base URL for the telephony provider callback. |
/// | PARLANCE_LANGUAGE | en | Default session language ("en" \| "kr"). |
/// | PARLANCE_LLM_MODEL | gpt-4o | Completion model name. |
/// | PARLANCE_LLM_API_URL | https://api.openai.com/v1 | OpenAI-compatible API base. |
/// | PARLANCE_LLM_API_KEY / OPENAI_API_KEY | (unset) | Bearer key for the completion backend. |
/// | PARLANCE_RETRY_LIMIT | 3 | Bounded retry count for transient backend failures. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSettings {
    pub client_name: String,
    pub base_url: Option<String>,
    pub language: Language,
    pub model: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub retry_limit: u32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            client_name: "default".to_string(),
            base_url: None,
            language: Language::En,
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl CallSettings {
    /// Loads settings from the environment, merging the `parlance.toml`
    /// overlay first if present. Env vars win over the file.
    pub fn from_env() -> CoreResult<Self> {
        let file = SettingsFile::load_from_path(&SettingsFile::default_path())?;
        let mut settings = Self::default();

        if let Some(model) = file.model {
            settings.model = model;
        }
        if let Some(api_url) = file.api_url {
            settings.api_url = api_url;
        }
        settings.api_key = file.api_key;

        if let Some(name) = env_opt_string("PARLANCE_CLIENT_NAME") {
            settings.client_name = name;
        }
        settings.base_url = env_opt_string("PARLANCE_BASE_URL").or(settings.base_url);
        if let Some(code) = env_opt_string("PARLANCE_LANGUAGE") {
            settings.language = Language::parse(&code)?;
        }
        if let Some(model) = env_opt_string("PARLANCE_LLM_MODEL") {
            settings.model = model;
        }
        if let Some(url) = env_opt_string("PARLANCE_LLM_API_URL") {
            settings.api_url = url;
        }
        settings.api_key = env_opt_string("PARLANCE_LLM_API_KEY")
            .or_else(|| env_opt_string("OPENAI_API_KEY"))
            .or(settings.api_key);
        if let Some(raw) = env_opt_string("PARLANCE_RETRY_LIMIT") {
            settings.retry_limit = raw
                .parse()
                .map_err(|_| CoreError::Settings(format!("invalid PARLANCE_RETRY_LIMIT: {raw}")))?;
        }

        Ok(settings)
    }

    /// The bearer key, if configured. Callers decide whether a missing key is
    /// fatal (the gateway treats it as fatal at startup).
    pub fn require_api_key(&self) -> CoreResult<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CoreError::Settings(
                    "completion backend requires PARLANCE_LLM_API_KEY or OPENAI_API_KEY".to_string(),
                )
            })
    }
}

/// Optional on-disk overlay (`parlance.toml`), for deployments where env vars
/// are awkward. Missing file is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl SettingsFile {
    pub fn default_path() -> PathBuf {
        PathBuf::from("parlance.toml")
    }

    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Settings(e.to_string()))
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = CallSettings::default();
        assert_eq!(settings.client_name, "default");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.retry_limit, 3);
        assert!(settings.require_api_key().is_err());
    }

    #[test]
    fn settings_file_round_trip() {
        let raw = r#"
            api_key = "sk-test"
            model = "gpt-4o-mini"
        "#;
        let file: SettingsFile = toml::from_str(raw).unwrap();
        assert_eq!(file.api_key.as_deref(), Some("sk-test"));
        assert_eq!(file.model.as_deref(), Some("gpt-4o-mini"));
        assert!(file.api_url.is_none());
    }

    #[test]
    fn missing_settings_file_is_default() {
        let file = SettingsFile::load_from_path(Path::new("does-not-exist.toml")).unwrap();
        assert!(file.api_key.is_none());
    }
}
