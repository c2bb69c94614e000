use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AIProvider {
    OpenAI,
    Ollama,
    Claude,
}

impl std::fmt::Display for AIProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AIProvider::OpenAI => write!(f, "openai"),
            AIProvider::Ollama => write!(f, "ollama"),
            AIProvider::Claude => write!(f, "claude"),
        }
    }
}

impl std::str::FromStr for AIProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(AIProvider::OpenAI),
            "ollama" => Ok(AIProvider::Ollama),
            "claude" => Ok(AIProvider::Claude),
            _ => Err(anyhow::anyhow!("Unknown AI provider: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIConfig {
    pub provider: AIProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for AIConfig {
    fn default() -> Self {
        AIConfig {
            provider: AIProvider::Ollama,
            model: "llama2".to_string(),
            api_key: None,
            base_url: Some("http://localhost:11434".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: "assistant".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub model: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions { max_tokens: 512, temperature: 0.7, model: None }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
    pub model: String,
}

/// Provider failures split into retry-worthy and terminal kinds. The engine
/// maps both to an execution_error result; the kind only drives logging.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerateError::Transient(_))
    }
}

/// Narrow seam over the text-generation collaborator so the engine can be
/// tested without a live provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: &GenerateOptions,
    ) -> Result<ChatResponse, GenerateError>;
}

pub struct AIProviderClient {
    config: AIConfig,
    http_client: reqwest::Client,
}

impl AIProviderClient {
    pub fn new(config: AIConfig) -> Self {
        let http_client = reqwest::Client::new();

        AIProviderClient { config, http_client }
    }

    pub fn get_model(&self) -> &str {
        &self.config.model
    }

    fn model_for(&self, options: &GenerateOptions) -> String {
        options.model.clone().unwrap_or_else(|| self.config.model.clone())
    }

    async fn chat_openai(
        &self,
        messages: Vec<ChatMessage>,
        options: &GenerateOptions,
    ) -> Result<ChatResponse, GenerateError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| GenerateError::Fatal("OpenAI API key required".to_string()))?;

        let request_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role,
                    "content": msg.content
                })
            })
            .collect();

        let model = self.model_for(options);
        let request_body = serde_json::json!({
            "model": model,
            "messages": request_messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature
        });

        let response = self
            .http_client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, format!("OpenAI API error: {}", error_text)));
        }

        let response_json: serde_json::Value =
            response.json().await.map_err(classify_reqwest_error)?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerateError::Fatal("Invalid OpenAI response format".to_string()))?
            .to_string();

        let tokens_used = response_json["usage"]["total_tokens"].as_u64().map(|t| t as u32);

        Ok(ChatResponse { content, tokens_used, model })
    }

    async fn chat_ollama(
        &self,
        messages: Vec<ChatMessage>,
        options: &GenerateOptions,
    ) -> Result<ChatResponse, GenerateError> {
        let default_url = "http://localhost:11434".to_string();
        let base_url = self.config.base_url.as_ref().unwrap_or(&default_url);

        let request_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role,
                    "content": msg.content
                })
            })
            .collect();

        let model = self.model_for(options);
        let request_body = serde_json::json!({
            "model": model,
            "messages": request_messages,
            "stream": false
        });

        let url = format!("{}/api/chat", base_url);
        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, format!("Ollama API error: {}", error_text)));
        }

        let response_json: serde_json::Value =
            response.json().await.map_err(classify_reqwest_error)?;

        let content = response_json["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerateError::Fatal("Invalid Ollama response format".to_string()))?
            .to_string();

        Ok(ChatResponse {
            content,
            tokens_used: None, // Ollama doesn't typically return token counts
            model,
        })
    }
}

#[async_trait]
impl TextGenerator for AIProviderClient {
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: &GenerateOptions,
    ) -> Result<ChatResponse, GenerateError> {
        match self.config.provider {
            AIProvider::OpenAI => self.chat_openai(messages, options).await,
            AIProvider::Ollama => self.chat_ollama(messages, options).await,
            AIProvider::Claude => {
                Err(GenerateError::Fatal("Claude provider not yet implemented".to_string()))
            }
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> GenerateError {
    if err.is_timeout() || err.is_connect() {
        GenerateError::Transient(err.to_string())
    } else {
        GenerateError::Fatal(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, message: String) -> GenerateError {
    if status.as_u16() == 429 || status.is_server_error() {
        GenerateError::Transient(message)
    } else {
        GenerateError::Fatal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert!(matches!("openai".parse::<AIProvider>().unwrap(), AIProvider::OpenAI));
        assert!(matches!("gpt".parse::<AIProvider>().unwrap(), AIProvider::OpenAI));
        assert!("aol".parse::<AIProvider>().is_err());
    }

    #[test]
    fn test_error_kinds() {
        assert!(GenerateError::Transient("503".to_string()).is_retryable());
        assert!(!GenerateError::Fatal("bad key".to_string()).is_retryable());
    }

    #[test]
    fn test_message_roles() {
        assert_eq!(ChatMessage::system("a").role, "system");
        assert_eq!(ChatMessage::user("b").role, "user");
        assert_eq!(ChatMessage::assistant("c").role, "assistant");
    }
}
