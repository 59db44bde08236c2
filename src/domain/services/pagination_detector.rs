// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::domain::models::{ExtractMode, FieldValue, Pagination};
use crate::domain::services::extraction_service::DomExtractor;
use crate::domain::services::llm_service::{ChatMessage, ModelResponse};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::utils::html_compactor::{HtmlCompactor, MinifyOptions};

const SYSTEM_PROMPT: &str = "You are an expert in web page structure. You help to find the \
pagination control of a web page: a link or a button that opens the next page or loads more items.";

static CLASSNAME_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": { "classname": { "type": ["string", "null"] } },
        "required": ["classname"]
    })
});

static TAG_TEXT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "tag": { "type": ["string", "null"] },
            "text": { "type": ["string", "null"] }
        },
        "required": ["tag", "text"]
    })
});

/// 分页控件检测器
///
/// 先按类名提问（从文档末尾的分块开始），再按标签+文本提问（从开头开始），
/// 第一个通过校验的xpath胜出。任何失败都退化为无限滚动。
pub struct PaginationDetector {
    agent: ModelAgent,
    compactor: HtmlCompactor,
    chunk_tokens: usize,
    max_retries: u32,
}

impl PaginationDetector {
    pub fn new(
        agent: ModelAgent,
        compactor: HtmlCompactor,
        chunk_tokens: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            agent,
            compactor,
            chunk_tokens,
            max_retries,
        }
    }

    /// 检测分页方式
    ///
    /// # 返回值
    ///
    /// * `Pagination::Xpath` - 找到唯一的翻页控件
    /// * `Pagination::Scroll` - 没有找到，或检测过程失败
    pub async fn detect(&self, html: &str) -> Pagination {
        match self.find_control(html).await {
            Ok(Some(xpath)) => {
                info!("Pagination control found: {}", xpath);
                Pagination::Xpath { xpath }
            }
            Ok(None) => {
                info!("No pagination control found, assuming infinite scroll");
                Pagination::Scroll
            }
            Err(e) => {
                warn!("Pagination detection failed, assuming infinite scroll: {}", e);
                Pagination::Scroll
            }
        }
    }

    async fn find_control(&self, html: &str) -> Result<Option<String>, DiscoveryError> {
        if let Some(xpath) = self.find_by_classname(html).await? {
            return Ok(Some(xpath));
        }
        self.find_by_tag_and_text(html).await
    }

    async fn find_by_classname(&self, html: &str) -> Result<Option<String>, DiscoveryError> {
        let minified = self.compactor.minify(
            html,
            &MinifyOptions::keep_only(&["class"]).without_substitutions(),
        );
        let chunks = self.compactor.chunk_text(&minified.html, self.chunk_tokens);
        for (index, chunk) in chunks.iter().enumerate().rev() {
            debug!("Searching pagination classname in chunk {}/{}", index + 1, chunks.len());
            let conversation = vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "Here is a part of the html of a web page:\n{}\n\n\
                     Find the class name of the element that switches to the next page or loads \
                     more items. Answer with JSON {{\"classname\": \"...\"}}. If there is no such \
                     element in this part, answer {{\"classname\": null}}.",
                    chunk
                )),
            ];
            let answer = self
                .agent
                .query(conversation, Some(&CLASSNAME_SCHEMA), self.max_retries, |r| {
                    classname_answer(html, r)
                })
                .await;
            if let Some(xpath) = settle(answer)? {
                return Ok(Some(xpath));
            }
        }
        Ok(None)
    }

    async fn find_by_tag_and_text(&self, html: &str) -> Result<Option<String>, DiscoveryError> {
        let minified = self
            .compactor
            .minify(html, &MinifyOptions::keep_only(&[]).without_substitutions());
        let chunks = self.compactor.chunk_text(&minified.html, self.chunk_tokens);
        for (index, chunk) in chunks.iter().enumerate() {
            debug!("Searching pagination tag and text in chunk {}/{}", index + 1, chunks.len());
            let conversation = vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "Here is a part of the html of a web page:\n{}\n\n\
                     Find the element that switches to the next page or loads more items. \
                     Answer with JSON {{\"tag\": \"...\", \"text\": \"...\"}} where tag is the tag \
                     name of the element and text is its exact text. If there is no such element \
                     in this part, answer {{\"tag\": null, \"text\": null}}.",
                    chunk
                )),
            ];
            let answer = self
                .agent
                .query(conversation, Some(&TAG_TEXT_SCHEMA), self.max_retries, |r| {
                    tag_text_answer(html, r)
                })
                .await;
            if let Some(xpath) = settle(answer)? {
                return Ok(Some(xpath));
            }
        }
        Ok(None)
    }
}

/// 单个分块的答案：校验用尽视为该分块没有结果，模型调用失败则向上传递
fn settle(
    answer: Result<Option<String>, DiscoveryError>,
) -> Result<Option<String>, DiscoveryError> {
    match answer {
        Ok(found) => Ok(found),
        Err(DiscoveryError::ValidationExhausted { reason }) => {
            debug!("No valid pagination control in chunk: {}", reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn classname_answer(html: &str, response: &ModelResponse) -> Result<Option<String>, String> {
    let value = response.json()?;
    let Some(classname) = nullable_str(&value, "classname")? else {
        return Ok(None);
    };
    if classname.contains('\'') {
        return Err(format!("Class name {} must not contain quotes", classname));
    }
    validate_control(html, &format!("//*[@class='{}']", classname)).map(Some)
}

fn tag_text_answer(html: &str, response: &ModelResponse) -> Result<Option<String>, String> {
    let value = response.json()?;
    let (Some(tag), Some(text)) = (nullable_str(&value, "tag")?, nullable_str(&value, "text")?)
    else {
        return Ok(None);
    };
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("{} is not a valid tag name", tag));
    }
    if text.contains('\'') {
        return Err(format!("Text {} must not contain quotes", text));
    }
    validate_control(html, &format!("//{}[text()='{}']", tag.to_ascii_lowercase(), text)).map(Some)
}

/// 控件必须恰好选中一个元素
fn validate_control(html: &str, xpath: &str) -> Result<String, String> {
    match DomExtractor::extract_by_xpath_in(html, xpath, ExtractMode::Text)
        .map_err(|e| e.to_string())?
    {
        None => Err(format!("Xpath {} does not match any element on the page", xpath)),
        Some(FieldValue::Many(values)) => Err(format!(
            "Xpath {} matches {} elements, but a single clickable element is needed",
            xpath,
            values.len()
        )),
        Some(FieldValue::Single(_)) => Ok(xpath.to_string()),
    }
}

fn nullable_str<'a>(value: &'a Value, key: &str) -> Result<Option<&'a str>, String> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(format!("\"{}\" must be a string or null, got {}", key, other)),
    }
}
