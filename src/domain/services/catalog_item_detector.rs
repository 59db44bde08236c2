// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::models::CatalogItem;
use crate::domain::services::extraction_service::DomExtractor;
use crate::domain::services::llm_service::{ChatMessage, ModelResponse};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::utils::html_compactor::{HtmlCompactor, MinifyOptions};
use crate::utils::url_utils;

const SYSTEM_PROMPT: &str = "You are an expert in web page structure. A catalog page lists many \
similar items, each rendered as a card. You find xpaths of those cards and of the links inside them.";

static CATALOG_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "card_xpath": { "type": ["string", "null"] },
            "url_xpath": { "type": ["string", "null"] }
        },
        "required": ["card_xpath", "url_xpath"]
    })
});

/// 目录卡片检测器
pub struct CatalogItemDetector {
    agent: ModelAgent,
    compactor: HtmlCompactor,
    chunk_tokens: usize,
    max_retries: u32,
}

impl CatalogItemDetector {
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

    /// 检测卡片及其链接
    ///
    /// # 参数
    ///
    /// * `html` - 页面源码
    /// * `base_url` - 解析相对链接的基址
    /// * `extra_prompt` - 调用方的补充说明（自然语言纠正）
    ///
    /// # 返回值
    ///
    /// * `Ok(CatalogItem)` - 卡片选择器、第一张卡片的HTML和页面上的所有链接
    /// * `Err(DiscoveryError::NotFound)` - 所有分块都没有卡片
    pub async fn detect(
        &self,
        html: &str,
        base_url: &str,
        extra_prompt: Option<&str>,
    ) -> Result<CatalogItem, DiscoveryError> {
        let minified = self
            .compactor
            .minify(html, &MinifyOptions::default().without_substitutions());
        let chunks = self.compactor.chunk_text(&minified.html, self.chunk_tokens);

        for (index, chunk) in chunks.iter().enumerate() {
            debug!("Searching catalog cards in chunk {}/{}", index + 1, chunks.len());
            let mut request = format!(
                "Here is a part of the html of a catalog web page:\n{}\n\n\
                 Find the xpath that selects every item card on the page and the xpath that \
                 selects the link to the item page inside every card. Both xpaths are evaluated \
                 against the whole page and must select the same number of elements. \
                 Answer with JSON {{\"card_xpath\": \"...\", \"url_xpath\": \"...\"}}. \
                 If there are no cards in this part, answer {{\"card_xpath\": null, \"url_xpath\": null}}.",
                chunk
            );
            if let Some(extra) = extra_prompt {
                request.push_str(&format!("\n\nAdditional instructions: {}", extra));
            }
            let conversation = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)];
            let found = self
                .agent
                .query(conversation, Some(&CATALOG_SCHEMA), self.max_retries, |r| {
                    selector_answer(html, r)
                })
                .await?;
            if let Some((card_xpath, url_xpath)) = found {
                info!("Catalog cards found: {} / {:?}", card_xpath, url_xpath);
                return materialize(html, card_xpath, url_xpath, base_url);
            }
        }
        Err(DiscoveryError::NotFound("catalog item"))
    }

    /// 手动指定卡片和链接选择器，跳过模型但复用同样的校验和物化步骤
    pub fn manually_change(
        &self,
        html: &str,
        card_xpath: &str,
        url_xpath: Option<&str>,
        base_url: &str,
    ) -> Result<CatalogItem, DiscoveryError> {
        check_selectors(html, card_xpath, url_xpath).map_err(DiscoveryError::InvalidSelector)?;
        materialize(
            html,
            card_xpath.to_string(),
            url_xpath.map(str::to_string),
            base_url,
        )
    }
}

type SelectorPair = (String, Option<String>);

fn selector_answer(html: &str, response: &ModelResponse) -> Result<Option<SelectorPair>, String> {
    let value = response.json()?;
    let text = |key: &str| -> Result<Option<String>, String> {
        match value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(other) => Err(format!("\"{}\" must be a string or null, got {}", key, other)),
        }
    };
    let Some(card_xpath) = text("card_xpath")? else {
        return Ok(None);
    };
    let url_xpath = text("url_xpath")?;
    check_selectors(html, &card_xpath, url_xpath.as_deref())?;
    Ok(Some((card_xpath, url_xpath)))
}

/// 卡片选择器至少选中一个元素；链接选择器与其选中数量相同
fn check_selectors(html: &str, card_xpath: &str, url_xpath: Option<&str>) -> Result<(), String> {
    let cards = DomExtractor::count_matches(html, card_xpath)
        .map_err(|e| format!("card_xpath {} is invalid: {}", card_xpath, e))?;
    if cards == 0 {
        return Err(format!("card_xpath {} does not match any element", card_xpath));
    }
    if let Some(url_xpath) = url_xpath {
        let urls = DomExtractor::link_values(html, url_xpath)
            .map_err(|e| format!("url_xpath {} is invalid: {}", url_xpath, e))?
            .len();
        if urls != cards {
            return Err(format!(
                "card_xpath {} selects {} elements but url_xpath {} selects {} links, \
                 the counts must be equal",
                card_xpath, cards, url_xpath, urls
            ));
        }
    }
    Ok(())
}

fn materialize(
    html: &str,
    card_xpath: String,
    url_xpath: Option<String>,
    base_url: &str,
) -> Result<CatalogItem, DiscoveryError> {
    let html_snippet = DomExtractor::first_outer_html(html, &card_xpath)?
        .ok_or(DiscoveryError::NotFound("catalog item"))?;
    let urls_on_page = match &url_xpath {
        Some(xpath) => DomExtractor::link_values(html, xpath)?
            .iter()
            .map(|href| url_utils::resolve_href(base_url, href))
            .collect(),
        None => Vec::new(),
    };
    Ok(CatalogItem {
        card_xpath,
        url_xpath,
        html_snippet,
        urls_on_page,
    })
}
