// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

use super::llm_service::{ChatMessage, LanguageModel, LlmError, ModelResponse};

/// 按脚本回答的模型，记录每次收到的对话
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelResponse>>,
    fallback: Option<ModelResponse>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(reply: ModelResponse) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn json(replies: Vec<Value>) -> Self {
        Self::new(replies.into_iter().map(ModelResponse::Json).collect())
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn conversation(&self, call: usize) -> Vec<ChatMessage> {
        self.seen.lock()[call].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _json_schema: Option<&Value>,
    ) -> Result<ModelResponse, LlmError> {
        self.seen.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| LlmError::Parse("script exhausted".to_string()))
    }
}
