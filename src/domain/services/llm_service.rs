// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::settings::LlmSettings;
use crate::utils::retry_policy::RetryPolicy;

/// 语言模型调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    NotConfigured,
    #[error("Failed to send request to LLM API: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("LLM API returned error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("LLM API rate limit exceeded")]
    RateLimited,
    #[error("Invalid response format from LLM API: {0}")]
    Parse(String),
}

impl LlmError {
    /// 传输层是否值得重试（限流、服务端错误、连接失败）
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited | LlmError::Connection(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::NotConfigured | LlmError::Parse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 对话中的一条消息，可附带一张截图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub image_base64: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            image_base64: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_base64: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image_base64: None,
        }
    }

    pub fn user_with_image(text: impl Into<String>, image_base64: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_base64: Some(image_base64.into()),
        }
    }
}

/// 有序的消息栈
pub type Conversation = Vec<ChatMessage>;

/// 模型回答：纯文本，或已解码的JSON
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text(String),
    Json(Value),
}

impl ModelResponse {
    /// 以文本形式呈现回答，用于写回对话
    pub fn render(&self) -> String {
        match self {
            ModelResponse::Text(text) => text.clone(),
            ModelResponse::Json(value) => value.to_string(),
        }
    }

    /// 取JSON形式的回答；文本回答会先去掉markdown代码块再解析
    pub fn json(&self) -> Result<Value, String> {
        match self {
            ModelResponse::Json(value) => Ok(value.clone()),
            ModelResponse::Text(text) => serde_json::from_str(strip_code_fences(text))
                .map_err(|e| format!("Response is not a valid JSON object: {}", e)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// 语言模型边界
///
/// 厂商相关的计费与限流重试都隐藏在实现内部；
/// 调用方只看到一次完整的问答。
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 发送消息栈并获取回答
    ///
    /// # 参数
    /// * `messages` - 按顺序排列的对话
    /// * `json_schema` - 需要强制JSON输出时给出期望结构
    async fn complete(
        &self,
        messages: &[ChatMessage],
        json_schema: Option<&Value>,
    ) -> Result<ModelResponse, LlmError>;
}

/// OpenAI兼容的聊天补全客户端
///
/// # 配置
///
/// 通过 `[llm]` 配置段设置：
/// - `api_key` - API密钥
/// - `model` / `vision_model` - 模型名称
/// - `api_base_url` - API基础URL
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_base_url: String,
    temperature: f32,
    retry_policy: RetryPolicy,
    usage: Mutex<TokenUsage>,
}

impl OpenAiChatModel {
    /// 用文本/JSON模型创建客户端
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        Self::build(settings, settings.model.clone())
    }

    /// 用视觉模型创建客户端；未配置视觉模型时返回None
    pub fn vision(settings: &LlmSettings) -> Result<Option<Self>, LlmError> {
        settings
            .vision_model
            .clone()
            .map(|model| Self::build(settings, model))
            .transpose()
    }

    fn build(settings: &LlmSettings, model: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            temperature: settings.temperature,
            retry_policy: RetryPolicy {
                max_retries: settings.max_http_retries,
                ..RetryPolicy::default()
            },
            usage: Mutex::new(TokenUsage::default()),
        })
    }

    pub fn new_with_config(api_key: String, model: String, api_base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            model,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            temperature: 0.0,
            retry_policy: RetryPolicy::default(),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 累计的令牌使用情况
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    fn request_body(&self, messages: &[ChatMessage], json_schema: Option<&Value>) -> Value {
        let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(schema) = json_schema {
            wire.push(json!({
                "role": "system",
                "content": format!(
                    "Respond only with a JSON object that matches this JSON schema: {}",
                    schema
                ),
            }));
        }
        for message in messages {
            let content = match &message.image_base64 {
                Some(image) => json!([
                    { "type": "text", "text": message.text },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{}", image) }
                    }
                ]),
                None => Value::String(message.text.clone()),
            };
            wire.push(json!({ "role": message.role, "content": content }));
        }

        let mut body = json!({
            "model": self.model,
            "messages": wire,
            "temperature": self.temperature,
        });
        if json_schema.is_some() {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    async fn send_once(&self, api_key: &str, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.api_base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        json_schema: Option<&Value>,
    ) -> Result<ModelResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let body = self.request_body(messages, json_schema);

        let mut attempt = 0;
        let payload = loop {
            match self.send_once(api_key, &body).await {
                Ok(payload) => break payload,
                Err(e) if e.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.retry_policy.calculate_backoff(attempt);
                    warn!(
                        "LLM request failed ({}), retrying in {:?} (attempt {}/{})",
                        e, delay, attempt, self.retry_policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(usage) = payload.get("usage") {
            let usage = TokenUsage {
                prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
            };
            self.usage.lock().add(&usage);
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))?;
        debug!("LLM {} answered with {} chars", self.model, content.len());

        if json_schema.is_some() {
            // Invalid JSON is left to the caller's validator so it can be asked again
            if let Ok(value) = serde_json::from_str::<Value>(strip_code_fences(content)) {
                return Ok(ModelResponse::Json(value));
            }
        }
        Ok(ModelResponse::Text(content.to_string()))
    }
}

/// 去掉markdown代码块包裹
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
#[path = "llm_service_test.rs"]
mod tests;
