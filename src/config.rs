use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ai_provider::{AIConfig, AIProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub default_provider: String,
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub default_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub generation_timeout_secs: u64,
    pub persistence_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            generation_timeout_secs: 30,
            persistence_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("aisway")
        });

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let config_str =
                std::fs::read_to_string(&config_path).context("Failed to read config.json")?;

            if config_str.trim().is_empty() {
                tracing::warn!("config file is empty, recreating defaults");
            } else {
                match serde_json::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        config.data_dir = data_dir;
                        config.fill_env_keys();
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse config.json, recreating: {e}");
                    }
                }
            }
        }

        let mut config = Self::default_config(data_dir);
        config.fill_env_keys();

        let json_str =
            serde_json::to_string_pretty(&config).context("Failed to serialize default config")?;
        std::fs::write(&config_path, json_str).context("Failed to write default config.json")?;

        Ok(config)
    }

    fn fill_env_keys(&mut self) {
        if let Some(openai) = self.providers.get_mut("openai") {
            if openai.api_key.as_ref().map_or(true, |key| key.is_empty()) {
                openai.api_key = std::env::var("OPENAI_API_KEY").ok();
            }
        }
    }

    fn default_config(data_dir: PathBuf) -> Self {
        let mut providers = HashMap::new();

        providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                default_model: "qwen2.5".to_string(),
                host: Some("http://localhost:11434".to_string()),
                api_key: None,
            },
        );

        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                default_model: "gpt-4o-mini".to_string(),
                host: None,
                api_key: std::env::var("OPENAI_API_KEY").ok(),
            },
        );

        Config {
            data_dir,
            default_provider: "ollama".to_string(),
            providers,
            engine: EngineSettings::default(),
        }
    }

    pub fn get_provider(&self, provider_name: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_name)
    }

    pub fn get_ai_config(
        &self,
        provider: Option<String>,
        model: Option<String>,
    ) -> Result<AIConfig> {
        let provider_name = provider.as_deref().unwrap_or(&self.default_provider);
        let provider_config = self
            .get_provider(provider_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown provider: {}", provider_name))?;

        let ai_provider: AIProvider = provider_name.parse()?;
        let model_name = model.unwrap_or_else(|| provider_config.default_model.clone());

        Ok(AIConfig {
            provider: ai_provider,
            model: model_name,
            api_key: provider_config.api_key.clone(),
            base_url: provider_config.host.clone(),
        })
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.data_dir.join("profiles.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(config.default_provider, "ollama");
        assert!(config.get_provider("openai").is_some());
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn test_config_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        config.default_provider = "openai".to_string();

        let json = serde_json::to_string_pretty(&config).unwrap();
        std::fs::write(dir.path().join("config.json"), json).unwrap();

        let reloaded = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.default_provider, "openai");
    }

    #[test]
    fn test_ai_config_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();

        let ai = config.get_ai_config(None, Some("llama3".to_string())).unwrap();
        assert_eq!(ai.model, "llama3");
        assert!(config.get_ai_config(Some("acme".to_string()), None).is_err());
    }
}
