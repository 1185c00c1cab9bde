// Judge Provider Service
// HTTP client for the external judge LLM (OpenAI-compatible chat + Anthropic)

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use thiserror::Error;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEEPSEEK_DEFAULT_URL: &str = "https://api.deepseek.com/chat/completions";
const GLM_DEFAULT_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";
const ANTHROPIC_DEFAULT_URL: &str = "https://api.anthropic.com/v1/messages";

const REQUEST_TIMEOUT_SECS: u64 = 80;

/// Safe context budget assumed for models missing from the table below.
pub const DEFAULT_CONTEXT_TOKENS: i64 = 32_000;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("API key not configured for provider '{0}'")]
    MissingApiKey(String),
}

impl ProviderError {
    /// Rate-limit classification drives the long-backoff retry path.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::ApiError { status, message } => {
                *status == 429
                    || *status == 503
                    || message.to_lowercase().contains("rate limit")
                    || message.to_lowercase().contains("quota")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub model: String,
}

pub fn parse_provider(spec: &str) -> ProviderSpec {
    let parts: Vec<&str> = spec.splitn(2, ':').collect();
    if parts.len() == 2 {
        ProviderSpec {
            name: parts[0].to_string(),
            model: parts[1].to_string(),
        }
    } else {
        ProviderSpec {
            name: spec.to_string(),
            model: String::new(),
        }
    }
}

/// Context window (tokens) per known judge model; prefix-matched so that
/// dated variants resolve to their family.
pub fn context_tokens_for(model: &str) -> i64 {
    const TABLE: &[(&str, i64)] = &[
        ("gpt-4o", 128_000),
        ("gpt-4.1", 1_000_000),
        ("glm-4", 128_000),
        ("deepseek-chat", 65_536),
        ("deepseek-reasoner", 65_536),
        ("claude-3-5", 200_000),
        ("claude-sonnet-4", 200_000),
        ("claude-opus-4", 200_000),
        ("gemini-2.5-pro", 1_000_000),
    ];
    let lowered = model.trim().to_lowercase();
    TABLE
        .iter()
        .find(|(prefix, _)| lowered.starts_with(prefix))
        .map(|(_, tokens)| *tokens)
        .unwrap_or(DEFAULT_CONTEXT_TOKENS)
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: i32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    pub latency_ms: i64,
}

pub struct JudgeClient {
    client: Client,
    openai_url: String,
    deepseek_url: String,
    glm_url: String,
    anthropic_url: String,
}

impl Default for JudgeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_urls() -> (String, String, String, String) {
    let openai_url =
        env::var("AUDITA_OPENAI_API_URL").unwrap_or_else(|_| OPENAI_DEFAULT_URL.to_string());
    let deepseek_url =
        env::var("AUDITA_DEEPSEEK_API_URL").unwrap_or_else(|_| DEEPSEEK_DEFAULT_URL.to_string());
    let glm_url = env::var("AUDITA_GLM_API_URL").unwrap_or_else(|_| GLM_DEFAULT_URL.to_string());
    let anthropic_url =
        env::var("AUDITA_ANTHROPIC_API_URL").unwrap_or_else(|_| ANTHROPIC_DEFAULT_URL.to_string());
    (openai_url, deepseek_url, glm_url, anthropic_url)
}

impl JudgeClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        let (openai_url, deepseek_url, glm_url, anthropic_url) = resolve_urls();
        Self {
            client,
            openai_url,
            deepseek_url,
            glm_url,
            anthropic_url,
        }
    }

    pub fn with_proxy(proxy_url: &str) -> Result<Self, ProviderError> {
        let proxy = reqwest::Proxy::all(proxy_url)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .proxy(proxy)
            .build()?;

        let (openai_url, deepseek_url, glm_url, anthropic_url) = resolve_urls();
        Ok(Self {
            client,
            openai_url,
            deepseek_url,
            glm_url,
            anthropic_url,
        })
    }

    /// Route a judging call by provider name. Unknown providers are treated
    /// as OpenAI-compatible endpoints.
    pub async fn call(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
        system: &str,
        user: &str,
        max_tokens: i32,
    ) -> Result<ChatResult, ProviderError> {
        match provider {
            "anthropic" | "claude" => {
                self.call_anthropic_api(&self.anthropic_url, model, api_key, system, user, max_tokens)
                    .await
            }
            "deepseek" => {
                self.call_chat_api(&self.deepseek_url, model, api_key, system, user, max_tokens, true)
                    .await
            }
            "glm" => {
                self.call_chat_api(&self.glm_url, model, api_key, system, user, max_tokens, true)
                    .await
            }
            _ => {
                self.call_chat_api(&self.openai_url, model, api_key, system, user, max_tokens, true)
                    .await
            }
        }
    }

    async fn call_chat_api(
        &self,
        url: &str,
        model: &str,
        api_key: &str,
        system: &str,
        user: &str,
        max_tokens: i32,
        use_json_format: bool,
    ) -> Result<ChatResult, ProviderError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens,
            temperature: 0.0,
            response_format: if use_json_format {
                Some(ResponseFormat {
                    r#type: "json_object".to_string(),
                })
            } else {
                None
            },
        };

        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let content = data
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or(ProviderError::MissingContent)?;

        Ok(ChatResult {
            content,
            latency_ms,
        })
    }

    async fn call_anthropic_api(
        &self,
        url: &str,
        model: &str,
        api_key: &str,
        system: &str,
        user: &str,
        max_tokens: i32,
    ) -> Result<ChatResult, ProviderError> {
        #[derive(Serialize)]
        struct AnthropicRequest {
            model: String,
            max_tokens: i32,
            system: String,
            messages: Vec<ChatMessage>,
        }

        #[derive(Deserialize)]
        struct AnthropicResponse {
            content: Option<Vec<AnthropicContent>>,
        }

        #[derive(Deserialize)]
        struct AnthropicContent {
            text: Option<String>,
        }

        let request = AnthropicRequest {
            model: model.to_string(),
            max_tokens,
            system: system.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let content = data
            .content
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.text)
            .ok_or(ProviderError::MissingContent)?;

        Ok(ChatResult {
            content,
            latency_ms,
        })
    }
}

/// Get API key from environment or config file
pub fn get_api_key(provider: &str) -> Option<String> {
    let env_keys = match provider {
        "openai" => vec!["OPENAI_API_KEY", "AUDITA_OPENAI_API_KEY"],
        "deepseek" => vec!["DEEPSEEK_API_KEY", "AUDITA_DEEPSEEK_API_KEY"],
        "glm" => vec!["GLM_API_KEY", "AUDITA_GLM_API_KEY"],
        "anthropic" | "claude" => vec!["ANTHROPIC_API_KEY", "AUDITA_ANTHROPIC_API_KEY"],
        _ => vec![],
    };

    for key in env_keys {
        if let Ok(val) = env::var(key) {
            let v = val.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }

    if let Some(config_dir) = super::ConfigStore::default_config_dir() {
        let store = super::ConfigStore::new(config_dir);
        if let Ok(Some(key)) = store.get_api_key(provider) {
            return Some(key);
        }
    }

    None
}

pub type JudgeFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;

/// The judge seam. One prompt string in, free-form judge text out; the
/// auditor owns all interpretation of the response.
pub trait Judge: Send + Sync {
    fn invoke<'a>(&'a self, system: &'a str, user: &'a str) -> JudgeFuture<'a>;
}

/// Judge backed by a live provider endpoint.
pub struct LiveJudge {
    client: JudgeClient,
    provider: String,
    model: String,
    api_key: String,
    max_tokens: i32,
}

const JUDGE_MAX_TOKENS: i32 = 4096;

impl LiveJudge {
    pub fn new(client: JudgeClient, provider: &str, model: &str, api_key: &str) -> Self {
        Self {
            client,
            provider: provider.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            max_tokens: JUDGE_MAX_TOKENS,
        }
    }

    /// Build a judge from a `name:model` spec, resolving the key from the
    /// environment or the config file.
    pub fn from_spec(spec: &str) -> Result<Self, ProviderError> {
        let parsed = parse_provider(spec);
        let model = if parsed.model.is_empty() {
            default_model_for(&parsed.name).to_string()
        } else {
            parsed.model
        };
        let api_key = get_api_key(&parsed.name)
            .ok_or_else(|| ProviderError::MissingApiKey(parsed.name.clone()))?;
        Ok(Self::new(JudgeClient::new(), &parsed.name, &model, &api_key))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "anthropic" | "claude" => "claude-sonnet-4-20250514",
        "deepseek" => "deepseek-chat",
        "glm" => "glm-4-flash",
        _ => "gpt-4o",
    }
}

impl Judge for LiveJudge {
    fn invoke<'a>(&'a self, system: &'a str, user: &'a str) -> JudgeFuture<'a> {
        Box::pin(async move {
            let result = self
                .client
                .call(
                    &self.provider,
                    &self.model,
                    &self.api_key,
                    system,
                    user,
                    self.max_tokens,
                )
                .await?;
            Ok(result.content)
        })
    }
}
