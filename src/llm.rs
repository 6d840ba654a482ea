//! Chat completion backends.
//!
//! Two wire formats cover the supported providers:
//!
//! | Provider | Endpoint | Key env (default) |
//! |----------|----------|-------------------|
//! | `openai` | `{url}/chat/completions` (OpenAI format) | `OPENAI_API_KEY` |
//! | `groq`   | `{url}/chat/completions` (OpenAI format) | `GROQ_API_KEY` |
//! | `ollama` | `{url}/api/chat` | none |
//!
//! Each request is a single attempt. The generator falls back to an
//! extractive answer on any error, so retrying here would only add latency.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use knowledgeops_core::backend::{Backend, BackendError};
use knowledgeops_core::generate::{ChatBackend, ChatMessage};

use crate::config::GenerationConfig;
use crate::http;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GROQ_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the chat backend named by `[generation].provider`.
///
/// Returns [`Backend::Unconfigured`] for `"disabled"`, and for hosted
/// providers whose API key variable is unset (with a warning).
pub fn create_chat_backend(config: &GenerationConfig) -> Result<Backend<Arc<dyn ChatBackend>>> {
    match config.provider.as_str() {
        "disabled" => Ok(Backend::Unconfigured),
        "openai" | "groq" => {
            let key_env = config
                .api_key_env
                .clone()
                .unwrap_or_else(|| default_key_env(&config.provider).to_string());
            match std::env::var(&key_env) {
                Ok(key) if !key.trim().is_empty() => Ok(Backend::Configured(Arc::new(
                    OpenAICompatChat::new(config, Some(key))?,
                ))),
                _ => {
                    tracing::warn!(
                        "{} not set; generation disabled, answers will use the fallback",
                        key_env
                    );
                    Ok(Backend::Unconfigured)
                }
            }
        }
        "ollama" => Ok(Backend::Configured(Arc::new(OllamaChat::new(config)?))),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn default_key_env(provider: &str) -> &'static str {
    match provider {
        "groq" => "GROQ_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

/// Resolve the chat completions endpoint from a base URL.
fn completions_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAICompatChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    model_id: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl OpenAICompatChat {
    pub fn new(config: &GenerationConfig, api_key: Option<String>) -> Result<Self> {
        let base = config.url.clone().unwrap_or_else(|| {
            match config.provider.as_str() {
                "groq" => DEFAULT_GROQ_URL,
                _ => DEFAULT_OPENAI_URL,
            }
            .to_string()
        });
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint: completions_endpoint(&base),
            model: config.model.clone(),
            model_id: format!("{}/{}", config.provider, config.model),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAICompatChat {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let json = http::send_json(req, self.timeout_secs).await?;
        json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing choices[0].message.content".to_string())
            })
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    model_id: String,
    timeout_secs: u64,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
            model: config.model.clone(),
            model_id: format!("ollama/{}", config.model),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });

        let json = http::send_json(self.client.post(&self.endpoint).json(&body), self.timeout_secs)
            .await?;
        json["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidResponse("missing message.content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use knowledgeops_core::models::Role;

    async fn mock_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(provider: &str, url: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            url: Some(url.to_string()),
            timeout_secs: 5,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            completions_endpoint("https://api.groq.com/openai/v1"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("http://localhost:1234/"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("http://x/v1/chat/completions"),
            "http://x/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_key_is_unconfigured() {
        let mut cfg = config("groq", "http://127.0.0.1:9");
        cfg.api_key_env = Some("KOPS_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        let backend = create_chat_backend(&cfg).unwrap();
        assert!(!backend.is_configured());
    }

    #[test]
    fn test_disabled_is_unconfigured() {
        let backend = create_chat_backend(&GenerationConfig::default()).unwrap();
        assert!(!backend.is_configured());
    }

    #[tokio::test]
    async fn test_openai_compatible_completion() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["max_tokens"], 42);
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "Hello there."}}]
                }))
            }),
        );
        let base = mock_server(router).await;
        let chat = OpenAICompatChat::new(&config("openai", &base), Some("k".into())).unwrap();
        assert_eq!(chat.model_id(), "openai/test-model");

        let messages = vec![
            ChatMessage::new(Role::System, "be brief"),
            ChatMessage::new(Role::User, "hi"),
        ];
        let answer = chat.complete(&messages, 42, 0.2).await.unwrap();
        assert_eq!(answer, "Hello there.");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let base = mock_server(router).await;
        let chat = OpenAICompatChat::new(&config("openai", &base), None).unwrap();
        let err = chat
            .complete(&[ChatMessage::new(Role::User, "hi")], 10, 0.7)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                code: 503,
                body: "overloaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_ollama_completion() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["options"]["num_predict"], 64);
                Json(serde_json::json!({
                    "message": {"role": "assistant", "content": "From ollama."}
                }))
            }),
        );
        let base = mock_server(router).await;
        let chat = OllamaChat::new(&config("ollama", &base)).unwrap();
        assert_eq!(chat.model_id(), "ollama/test-model");
        let answer = chat
            .complete(&[ChatMessage::new(Role::User, "hi")], 64, 0.7)
            .await
            .unwrap();
        assert_eq!(answer, "From ollama.");
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { Json(serde_json::json!({"done": true})) }),
        );
        let base = mock_server(router).await;
        let chat = OllamaChat::new(&config("ollama", &base)).unwrap();
        let err = chat
            .complete(&[ChatMessage::new(Role::User, "hi")], 64, 0.7)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }
}
