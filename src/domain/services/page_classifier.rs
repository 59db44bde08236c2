// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing::info;

use crate::domain::models::{ParseWebpageTypeError, WebpageType};
use crate::domain::services::llm_service::{ChatMessage, ModelResponse};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::utils::html_compactor::{HtmlCompactor, MinifyOptions};

const CLASSIFIER_PROMPT: &str = "You are a web page classifier. Classify the web page into one of \
these categories: \"catalog\" (a page listing many similar items, e.g. products, articles or \
search results), \"detailed_page\" (a page describing exactly one item), \"captcha\" (a page asking \
to prove that you are human), \"other\" (anything else). Return only the category name.";

/// 页面类型分类器
///
/// 视觉模式基于截图，文本模式基于压缩后的HTML。
pub struct PageTypeClassifier {
    agent: ModelAgent,
    vision: Option<ModelAgent>,
    compactor: HtmlCompactor,
    max_retries: u32,
    prompt_tokens: usize,
}

impl PageTypeClassifier {
    pub fn new(
        agent: ModelAgent,
        vision: Option<ModelAgent>,
        compactor: HtmlCompactor,
        max_retries: u32,
        prompt_tokens: usize,
    ) -> Self {
        Self {
            agent,
            vision,
            compactor,
            max_retries,
            prompt_tokens,
        }
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some()
    }

    /// 根据截图分类
    pub async fn classify_screenshot(
        &self,
        screenshot_base64: &str,
    ) -> Result<WebpageType, DiscoveryError> {
        let vision = self.vision.as_ref().ok_or(DiscoveryError::VisionUnavailable)?;
        let conversation = vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user_with_image("Classify this web page screenshot.", screenshot_base64),
        ];
        let page_type = vision
            .query(conversation, None, self.max_retries, parse_page_type)
            .await?;
        info!("Page classified from screenshot as {}", page_type);
        Ok(page_type)
    }

    /// 根据HTML分类（超出预算的部分被截断）
    pub async fn classify_html(&self, html: &str) -> Result<WebpageType, DiscoveryError> {
        let minified = self
            .compactor
            .minify(html, &MinifyOptions::default().without_substitutions());
        let truncated = self
            .compactor
            .chunk_text(&minified.html, self.prompt_tokens)
            .into_iter()
            .next()
            .unwrap_or_default();
        let conversation = vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(format!("Here is the html of the web page:\n{}", truncated)),
        ];
        let page_type = self
            .agent
            .query(conversation, None, self.max_retries, parse_page_type)
            .await?;
        info!("Page classified from html as {}", page_type);
        Ok(page_type)
    }
}

fn parse_page_type(response: &ModelResponse) -> Result<WebpageType, String> {
    response
        .render()
        .parse()
        .map_err(|e: ParseWebpageTypeError| e.to_string())
}
