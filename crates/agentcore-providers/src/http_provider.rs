//! Generic HTTP-based LLM provider for any OpenAI-compatible API.
//!
//! Talks directly to a configured `/chat/completions` endpoint — no
//! provider-specific routing or model-name rewriting.

use async_trait::async_trait;
use tracing::{debug, error};

use agentcore_core::config::schema::ProviderConfig;
use agentcore_core::types::{ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition};

use crate::traits::{LlmProvider, LlmRequestConfig};

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A generic LLM provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication, resolved from `api_key_env`.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
    /// Display name for logging, taken from the config's `name`.
    display_name: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider from a provider config.
    ///
    /// The API key is resolved from the environment variable named by
    /// `config.api_key_env`, not stored in the config itself.
    pub fn new(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        HttpProvider {
            client,
            api_base: config.base_url.clone(),
            api_key: config.api_key().unwrap_or_default(),
            default_model: config.default_model.clone(),
            display_name: config.name.clone(),
        }
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        debug!(
            provider = %self.display_name,
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let url = self.completions_url();

        let result = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = %self.display_name, error = %e, "HTTP request failed");
                return LlmResponse::error(format!("Error calling LLM: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(provider = %self.display_name, status = %status, body = %error_text, "API error");
            return LlmResponse::error(format!("Error calling LLM: {status} — {error_text}"));
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(chat_resp) => {
                let llm_resp: LlmResponse = chat_resp.into();
                debug!(
                    provider = %self.display_name,
                    has_content = llm_resp.content.is_some(),
                    tool_calls = llm_resp.tool_calls.len(),
                    finish_reason = llm_resp.finish_reason.as_deref().unwrap_or("?"),
                    "LLM response received"
                );
                llm_resp
            }
            Err(e) => {
                error!(provider = %self.display_name, error = %e, "failed to parse LLM response");
                LlmResponse::error(format!("Error parsing LLM response: {e}"))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(base_url: &str, api_key_env: &str) -> ProviderConfig {
        ProviderConfig {
            name: "test".to_string(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    fn set_key(name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let config = make_config("https://api.openai.com/v1/", "");
        let provider = HttpProvider::new(&config);
        assert_eq!(provider.completions_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_completions_url_no_trailing_slash() {
        let config = make_config("https://api.openai.com/v1", "");
        let provider = HttpProvider::new(&config);
        assert_eq!(provider.completions_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_api_key_resolved_from_env() {
        set_key("HTTP_PROVIDER_TEST_KEY", "sk-resolved-123");
        let config = make_config("https://api.openai.com/v1", "HTTP_PROVIDER_TEST_KEY");
        let provider = HttpProvider::new(&config);
        assert_eq!(provider.api_key, "sk-resolved-123");
        std::env::remove_var("HTTP_PROVIDER_TEST_KEY");
    }

    #[test]
    fn test_missing_api_key_env_is_empty_key() {
        let config = make_config("https://api.openai.com/v1", "");
        let provider = HttpProvider::new(&config);
        assert_eq!(provider.api_key, "");
    }

    #[test]
    fn test_display_name_and_default_model() {
        let mut config = make_config("https://api.openai.com/v1", "");
        config.name = "Groq".to_string();
        config.default_model = "llama-3.3-70b".to_string();
        let provider = HttpProvider::new(&config);
        assert_eq!(provider.display_name(), "Groq");
        assert_eq!(provider.default_model(), "llama-3.3-70b");
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_chat_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "message": {
                        "content": "Hello!",
                        "tool_calls": null
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            })))
            .mount(&mock_server)
            .await;

        set_key("CHAT_SUCCESS_TEST_KEY", "test-key-123");
        let config = make_config(&mock_server.uri(), "CHAT_SUCCESS_TEST_KEY");
        let provider = HttpProvider::new(&config);

        let messages = vec![Message::system("You are an assistant."), Message::user("Hello")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, None, "gpt-4o", &req_config).await;

        assert_eq!(resp.content.as_deref(), Some("Hello!"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.as_ref().unwrap().total_tokens, 15);
        std::env::remove_var("CHAT_SUCCESS_TEST_KEY");
    }

    #[tokio::test]
    async fn test_chat_with_tool_calls() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-tools",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc123",
                            "type": "function",
                            "function": {
                                "name": "read_file",
                                "arguments": "{\"path\": \"README.md\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {
                    "prompt_tokens": 20,
                    "completion_tokens": 15,
                    "total_tokens": 35
                }
            })))
            .mount(&mock_server)
            .await;

        let config = make_config(&mock_server.uri(), "");
        let provider = HttpProvider::new(&config);

        let tool_def = ToolDefinition::new(
            "read_file",
            "Read a file",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        );

        let messages = vec![Message::user("Read README.md")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, Some(&[tool_def]), "gpt-4o", &req_config).await;

        assert!(resp.content.is_none());
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "read_file");
        assert_eq!(resp.tool_calls[0].id, "call_abc123");
    }

    #[tokio::test]
    async fn test_chat_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
            })))
            .mount(&mock_server)
            .await;

        let config = make_config(&mock_server.uri(), "");
        let provider = HttpProvider::new(&config);

        let messages = vec![Message::user("Hello")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, None, "gpt-4o", &req_config).await;

        assert!(resp.content.is_some());
        let content = resp.content.unwrap();
        assert!(content.contains("Error calling LLM"));
        assert!(content.contains("429"));
    }

    #[tokio::test]
    async fn test_chat_network_error() {
        let config = make_config("http://127.0.0.1:1", "");
        let provider = HttpProvider::new(&config);

        let messages = vec![Message::user("Hello")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, None, "gpt-4o", &req_config).await;

        assert!(resp.content.is_some());
        assert!(resp.content.unwrap().contains("Error calling LLM"));
    }

    #[tokio::test]
    async fn test_chat_sends_correct_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-body",
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
                "usage": null
            })))
            .mount(&mock_server)
            .await;

        let config = make_config(&mock_server.uri(), "");
        let provider = HttpProvider::new(&config);

        let messages = vec![Message::user("test")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, None, "deepseek-chat", &req_config).await;

        assert_eq!(resp.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_chat_with_reasoning_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-reasoning",
                "choices": [{
                    "message": {
                        "content": "The answer is 42.",
                        "reasoning_content": "Let me think step by step..."
                    },
                    "finish_reason": "stop"
                }],
                "usage": null
            })))
            .mount(&mock_server)
            .await;

        let config = make_config(&mock_server.uri(), "");
        let provider = HttpProvider::new(&config);

        let messages = vec![Message::user("What is the meaning of life?")];
        let req_config = LlmRequestConfig::default();

        let resp = provider.chat(&messages, None, "deepseek-reasoner", &req_config).await;

        assert_eq!(resp.content.as_deref(), Some("The answer is 42."));
        assert_eq!(resp.reasoning_content.as_deref(), Some("Let me think step by step..."));
    }
}
