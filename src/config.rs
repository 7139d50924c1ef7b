use std::time::Duration;

use chatgpt::config::ChatGPTEngine;
use thiserror::Error;

use crate::quiz::generator::ValidationPolicy;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown model '{0}', expected gpt-3.5-turbo or gpt-4")]
    UnknownModel(String),
    #[error("QUIZ_MODEL_TIMEOUT_SECS must be a positive number of seconds, got '{0}'")]
    InvalidTimeout(String),
    #[error("unknown validation policy '{0}', expected fallback or surface")]
    UnknownPolicy(String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Without a key the generator runs fully offline on fallback quizzes.
    pub api_key: Option<String>,
    pub model: ChatGPTEngine,
    pub timeout: Duration,
    pub policy: ValidationPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: ChatGPTEngine::Gpt35Turbo,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            policy: ValidationPolicy::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        settings.api_key = lookup("CHATGPT_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if let Some(model) = lookup("QUIZ_MODEL") {
            settings.model = match model.trim().to_lowercase().as_str() {
                "gpt-3.5-turbo" | "gpt35turbo" => ChatGPTEngine::Gpt35Turbo,
                "gpt-4" | "gpt4" => ChatGPTEngine::Gpt4,
                _ => return Err(ConfigError::UnknownModel(model)),
            };
        }

        if let Some(raw) = lookup("QUIZ_MODEL_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(raw.clone()))?;
            settings.timeout = Duration::from_secs(secs);
        }

        if let Some(policy) = lookup("QUIZ_VALIDATION_POLICY") {
            settings.policy = match policy.trim().to_lowercase().as_str() {
                "fallback" => ValidationPolicy::Fallback,
                "surface" => ValidationPolicy::Surface,
                _ => return Err(ConfigError::UnknownPolicy(policy)),
            };
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_offline_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert!(settings.api_key.is_none());
        assert_eq!(settings.timeout, Duration::from_secs(15));
        assert_eq!(settings.policy, ValidationPolicy::Fallback);
    }

    #[test]
    fn reads_all_keys() {
        let settings = Settings::from_lookup(lookup(&[
            ("CHATGPT_API_KEY", " sk-abc "),
            ("QUIZ_MODEL", "GPT-4"),
            ("QUIZ_MODEL_TIMEOUT_SECS", "30"),
            ("QUIZ_VALIDATION_POLICY", "surface"),
        ]))
        .unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("sk-abc"));
        assert_eq!(settings.model, ChatGPTEngine::Gpt4);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.policy, ValidationPolicy::Surface);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let settings = Settings::from_lookup(lookup(&[("CHATGPT_API_KEY", "  ")])).unwrap();
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            Settings::from_lookup(lookup(&[("QUIZ_MODEL", "llama")])).unwrap_err(),
            ConfigError::UnknownModel("llama".to_string())
        );
        assert_eq!(
            Settings::from_lookup(lookup(&[("QUIZ_MODEL_TIMEOUT_SECS", "0")])).unwrap_err(),
            ConfigError::InvalidTimeout("0".to_string())
        );
        assert_eq!(
            Settings::from_lookup(lookup(&[("QUIZ_VALIDATION_POLICY", "retry")])).unwrap_err(),
            ConfigError::UnknownPolicy("retry".to_string())
        );
    }
}
