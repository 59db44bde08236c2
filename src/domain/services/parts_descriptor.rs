// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::domain::models::HtmlPart;
use crate::domain::services::llm_service::{ChatMessage, ModelResponse};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::utils::html_compactor::{HtmlCompactor, MinifyOptions, SplitBudget};

const DESCRIBE_PROMPT: &str = "You describe parts of a web page. For every part you get its \
xpath and its text; describe in one short line what the part contains.";

const RELEVANCE_PROMPT: &str = "You decide which parts of a web page describe the one item the \
page is about: its name, price, images, characteristics, description. Navigation, ads, reviews \
of other items, recommendations and footers are not relevant.";

static RELEVANCE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "relevant_xpaths": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["relevant_xpaths"]
    })
});

/// 详情页片段相关性描述器
///
/// 先逐段描述，再挑出与页面主体条目相关的片段，删除其余片段。
pub struct PartsRelevanceDescriptor {
    agent: ModelAgent,
    compactor: HtmlCompactor,
    part_tokens: usize,
    prompt_tokens: usize,
    max_retries: u32,
}

impl PartsRelevanceDescriptor {
    pub fn new(
        agent: ModelAgent,
        compactor: HtmlCompactor,
        part_tokens: usize,
        prompt_tokens: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            agent,
            compactor,
            part_tokens,
            prompt_tokens,
            max_retries,
        }
    }

    /// 精简详情页
    ///
    /// # 参数
    ///
    /// * `html` - 页面源码
    /// * `page_description` - 可选的页面整体描述（例如截图描述）
    ///
    /// # 返回值
    ///
    /// 压缩后只保留相关片段的HTML
    pub async fn summarize(
        &self,
        html: &str,
        page_description: Option<&str>,
    ) -> Result<String, DiscoveryError> {
        let minified = self
            .compactor
            .minify(html, &MinifyOptions::default().without_substitutions())
            .html;
        let parts = self.compactor.split(&minified, SplitBudget::Text(self.part_tokens));
        if parts.len() <= 1 {
            debug!("Page has {} part(s), nothing to filter", parts.len());
            return Ok(minified);
        }

        let descriptions = self.describe_parts(&parts).await?;
        let relevant = self.select_relevant(&descriptions, page_description).await?;
        let irrelevant: Vec<&str> = parts
            .iter()
            .map(|p| p.xpath.as_str())
            .filter(|xpath| !relevant.contains(*xpath))
            .collect();
        info!(
            "Keeping {} of {} page parts",
            parts.len() - irrelevant.len(),
            parts.len()
        );
        Ok(self.compactor.remove_nodes_by_xpath(&minified, &irrelevant)?)
    }

    async fn describe_parts(
        &self,
        parts: &[HtmlPart],
    ) -> Result<BTreeMap<String, String>, DiscoveryError> {
        let mut descriptions = BTreeMap::new();
        for batch in batches(parts, self.prompt_tokens) {
            let listing = batch
                .iter()
                .map(|p| format!("xpath: {}\ntext: {}", p.xpath, p.text_content))
                .collect::<Vec<_>>()
                .join("\n\n");
            let expected: Vec<String> = batch.iter().map(|p| p.xpath.clone()).collect();
            let conversation = vec![
                ChatMessage::system(DESCRIBE_PROMPT),
                ChatMessage::user(format!(
                    "{}\n\nAnswer with a JSON object that maps every xpath to its description.",
                    listing
                )),
            ];
            let described = self
                .agent
                .query(conversation, Some(&json!({"type": "object"})), self.max_retries, |r| {
                    description_answer(&expected, r)
                })
                .await?;
            descriptions.extend(described);
        }
        Ok(descriptions)
    }

    async fn select_relevant(
        &self,
        descriptions: &BTreeMap<String, String>,
        page_description: Option<&str>,
    ) -> Result<HashSet<String>, DiscoveryError> {
        let listing = descriptions
            .iter()
            .map(|(xpath, description)| format!("{}: {}", xpath, description))
            .collect::<Vec<_>>()
            .join("\n");
        let mut request = format!(
            "Here are the parts of a web page with their descriptions:\n{}\n\n\
             Which parts are relevant to the item the page describes? Answer with JSON \
             {{\"relevant_xpaths\": [\"...\"]}}.",
            listing
        );
        if let Some(page) = page_description {
            request.push_str(&format!("\n\nThis is how the page looks: {}", page));
        }
        let conversation = vec![ChatMessage::system(RELEVANCE_PROMPT), ChatMessage::user(request)];
        self.agent
            .query(conversation, Some(&RELEVANCE_SCHEMA), self.max_retries, |r| {
                relevance_answer(descriptions, r)
            })
            .await
    }
}

/// 按文本词元预算把片段分批
fn batches(parts: &[HtmlPart], budget: usize) -> Vec<&[HtmlPart]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut size = 0;
    for (i, part) in parts.iter().enumerate() {
        if i > start && size + part.text_size > budget {
            batches.push(&parts[start..i]);
            start = i;
            size = 0;
        }
        size += part.text_size;
    }
    if start < parts.len() {
        batches.push(&parts[start..]);
    }
    batches
}

fn description_answer(
    expected: &[String],
    response: &ModelResponse,
) -> Result<BTreeMap<String, String>, String> {
    let value = response.json()?;
    let Value::Object(map) = value else {
        return Err("Answer must be a JSON object".to_string());
    };
    let mut described = BTreeMap::new();
    let mut missing = Vec::new();
    for xpath in expected {
        match map.get(xpath).and_then(Value::as_str) {
            Some(text) => {
                described.insert(xpath.clone(), text.trim().to_string());
            }
            None => missing.push(xpath.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(format!("Descriptions are missing for: {}", missing.join(", ")));
    }
    Ok(described)
}

fn relevance_answer(
    descriptions: &BTreeMap<String, String>,
    response: &ModelResponse,
) -> Result<HashSet<String>, String> {
    let value = response.json()?;
    let xpaths: Vec<String> = serde_json::from_value(
        value.get("relevant_xpaths").cloned().unwrap_or(Value::Null),
    )
    .map_err(|e| format!("\"relevant_xpaths\" must be a list of strings: {}", e))?;
    if xpaths.is_empty() {
        return Err("At least one part must be relevant".to_string());
    }
    let unknown: Vec<&str> = xpaths
        .iter()
        .filter(|x| !descriptions.contains_key(x.as_str()))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(format!("Unknown xpaths: {}", unknown.join(", ")));
    }
    Ok(xpaths.into_iter().collect())
}

/// 截图描述器（需要视觉模型）
pub struct ScreenshotDescriber {
    agent: ModelAgent,
    max_retries: u32,
}

impl ScreenshotDescriber {
    pub fn new(agent: ModelAgent, max_retries: u32) -> Self {
        Self { agent, max_retries }
    }

    /// 用一段话描述截图中的页面
    pub async fn describe(&self, screenshot_base64: &str) -> Result<String, DiscoveryError> {
        let conversation = vec![ChatMessage::user_with_image(
            "Describe this web page screenshot in one paragraph: what kind of page it is, what \
             item it shows and where the main information is located.",
            screenshot_base64,
        )];
        self.agent
            .query(conversation, None, self.max_retries, |r| {
                let text = r.render();
                if text.trim().is_empty() {
                    Err("The description is empty".to_string())
                } else {
                    Ok(text.trim().to_string())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::test_support::ScriptedModel;
    use std::sync::Arc;

    const PAGE: &str = r#"<html><body>
      <nav><a href="/">Home</a> <a href="/catalog">Catalog of everything we sell</a></nav>
      <main><h1>Stainless steel kettle</h1><p>Boils one point seven litres of water quickly</p></main>
      <aside>Customers also bought toasters, mixers and blenders</aside>
    </body></html>"#;

    fn descriptor(model: Arc<ScriptedModel>) -> PartsRelevanceDescriptor {
        PartsRelevanceDescriptor::new(ModelAgent::new(model), HtmlCompactor::default(), 22, 4000, 1)
    }

    #[tokio::test]
    async fn test_irrelevant_parts_are_removed() {
        let model = Arc::new(ScriptedModel::json(vec![
            json!({
                "/html/body/nav": "site navigation",
                "/html/body/main": "kettle name and description",
                "/html/body/aside": "recommendations"
            }),
            json!({"relevant_xpaths": ["/html/body/main"]}),
        ]));
        let html = descriptor(model.clone()).summarize(PAGE, Some("a kettle shop page")).await.unwrap();
        assert!(html.contains("Stainless steel kettle"));
        assert!(!html.contains("toasters"));
        assert!(!html.contains("Catalog of everything"));
        assert!(model.conversation(1)[1].text.contains("a kettle shop page"));
    }

    #[tokio::test]
    async fn test_missing_descriptions_are_rejected() {
        let model = Arc::new(ScriptedModel::json(vec![
            json!({"/html/body/main": "kettle"}),
            json!({
                "/html/body/nav": "navigation",
                "/html/body/main": "kettle",
                "/html/body/aside": "recommendations"
            }),
            json!({"relevant_xpaths": ["/html/body/main", "/html/body/footer"]}),
            json!({"relevant_xpaths": ["/html/body/main"]}),
        ]));
        let html = descriptor(model.clone()).summarize(PAGE, None).await.unwrap();
        assert!(!html.contains("toasters"));
        assert!(model.conversation(1)[3].text.contains("Descriptions are missing for"));
        assert!(model.conversation(3)[3].text.contains("Unknown xpaths: /html/body/footer"));
    }

    #[tokio::test]
    async fn test_small_page_is_returned_without_model_calls() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let html = PartsRelevanceDescriptor::new(
            ModelAgent::new(model.clone()),
            HtmlCompactor::default(),
            4000,
            4000,
            1,
        )
        .summarize(PAGE, None)
        .await
        .unwrap();
        assert!(html.contains("toasters"));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_batches_respect_budget() {
        let part = |size| HtmlPart {
            xpath: String::new(),
            html_content: String::new(),
            text_content: String::new(),
            html_size: size,
            text_size: size,
        };
        let parts = vec![part(5), part(5), part(5), part(20)];
        let sizes: Vec<usize> = batches(&parts, 10).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }
}
