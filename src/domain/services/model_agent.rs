// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::services::extraction_service::ExtractionError;
use crate::domain::services::llm_service::{
    ChatMessage, Conversation, LanguageModel, LlmError, ModelResponse,
};
use crate::utils::xpath::XPathError;

/// 结构发现错误类型
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 语言模型调用失败
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// 重试次数用尽仍未得到有效答案
    #[error("Model failed to produce a valid answer: {reason}")]
    ValidationExhausted { reason: String },
    /// 页面上没有可检测的结构（合法的终止结果）
    #[error("{0} not found")]
    NotFound(&'static str),
    /// 调用方给出的选择器无效
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    /// 未配置视觉模型
    #[error("Vision model is not configured")]
    VisionUnavailable,
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    XPath(#[from] XPathError),
}

/// 问答-校验-重试代理
///
/// 每个检测器都只通过这一个循环向模型提问，
/// 区别仅在于提示词和校验函数。
#[derive(Clone)]
pub struct ModelAgent {
    model: Arc<dyn LanguageModel>,
}

impl ModelAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// 提问并校验答案
    ///
    /// 校验函数返回 `Err(reason)` 时，把被拒绝的答案和纠正指令追加到对话中再问一次。
    /// 模型总共被调用至多 `max_retries + 1` 次。
    ///
    /// # 参数
    /// * `conversation` - 初始消息栈
    /// * `json_schema` - 需要JSON输出时的期望结构
    /// * `max_retries` - 校验失败后的最大重问次数
    /// * `validate` - 校验并转换答案
    ///
    /// # 返回值
    /// * `Ok(T)` - 通过校验的答案
    /// * `Err(DiscoveryError::ValidationExhausted)` - 携带最后一次拒绝原因
    /// * `Err(DiscoveryError::Llm)` - 模型调用本身失败
    pub async fn query<T, F>(
        &self,
        mut conversation: Conversation,
        json_schema: Option<&Value>,
        max_retries: u32,
        mut validate: F,
    ) -> Result<T, DiscoveryError>
    where
        F: FnMut(&ModelResponse) -> Result<T, String> + Send,
        T: Send,
    {
        let mut remaining = max_retries;
        loop {
            metrics::counter!("pageshape_model_invocations_total").increment(1);
            let response = self.model.complete(&conversation, json_schema).await?;

            let reason = match validate(&response) {
                Ok(value) => {
                    debug!(
                        "Model answer accepted after {} attempt(s)",
                        max_retries - remaining + 1
                    );
                    return Ok(value);
                }
                Err(reason) => reason,
            };

            metrics::counter!("pageshape_model_rejections_total").increment(1);
            if remaining == 0 {
                warn!("Model answer rejected, no retries left: {}", reason);
                return Err(DiscoveryError::ValidationExhausted { reason });
            }
            warn!(
                "Model answer rejected ({} retries left): {}",
                remaining, reason
            );
            remaining -= 1;
            conversation.push(ChatMessage::assistant(response.render()));
            conversation.push(ChatMessage::user(format!(
                "Your previous answer is invalid: {}\nFix the error and answer again.",
                reason
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::llm_service::Role;
    use crate::domain::services::test_support::ScriptedModel;

    #[tokio::test]
    async fn test_always_rejecting_validator_invokes_exactly_retries_plus_one() {
        let model = Arc::new(ScriptedModel::repeating(ModelResponse::Text("nope".to_string())));
        let agent = ModelAgent::new(model.clone());
        let result: Result<(), _> = agent
            .query(vec![ChatMessage::user("q")], None, 3, |r| {
                Err(format!("{} is wrong", r.render()))
            })
            .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::ValidationExhausted { ref reason }) if reason == "nope is wrong"
        ));
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_invokes_once() {
        let model = Arc::new(ScriptedModel::repeating(ModelResponse::Text("x".to_string())));
        let agent = ModelAgent::new(model.clone());
        let result: Result<(), _> = agent
            .query(vec![ChatMessage::user("q")], None, 0, |_| Err("bad".to_string()))
            .await;
        assert!(result.is_err());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_answer_is_fed_back_into_conversation() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelResponse::Text("shop".to_string()),
            ModelResponse::Text("catalog".to_string()),
        ]));
        let agent = ModelAgent::new(model.clone());
        let answer = agent
            .query(vec![ChatMessage::user("classify")], None, 2, |r| {
                if r.render() == "catalog" {
                    Ok(r.render())
                } else {
                    Err("not a page type".to_string())
                }
            })
            .await
            .unwrap();
        assert_eq!(answer, "catalog");
        assert_eq!(model.calls(), 2);

        let second = model.conversation(1);
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(second[1].text, "shop");
        assert!(second[2].text.contains("not a page type"));
    }

    #[tokio::test]
    async fn test_model_failure_propagates_without_retry() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let agent = ModelAgent::new(model.clone());
        let result: Result<String, _> = agent
            .query(vec![ChatMessage::user("q")], None, 3, |r| Ok(r.render()))
            .await;
        assert!(matches!(result, Err(DiscoveryError::Llm(_))));
        assert_eq!(model.calls(), 1);
    }
}
