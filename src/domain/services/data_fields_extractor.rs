// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use ego_tree::NodeRef;
use once_cell::sync::Lazy;
use scraper::{Html, Node};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;

use crate::domain::models::{DynamicField, ExtractMode, StaticField, WebpageFields};
use crate::domain::services::extraction_service::{first_card, relativize, DomExtractor};
use crate::domain::services::llm_service::{ChatMessage, ModelResponse};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::utils::html_compactor::{HtmlCompactor, MinifyOptions};

const SYSTEM_PROMPT: &str = "You are an expert in web scraping. You find xpaths of data fields in \
html. Xpaths must select the data itself, not the elements around it.";

static STATIC_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "fields": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "xpath": { "type": "string" },
                        "extract_mode": { "enum": ["text", "href", "src"] }
                    },
                    "required": ["name", "xpath", "extract_mode"]
                }
            }
        },
        "required": ["fields"]
    })
});

static DYNAMIC_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_name": { "type": "string" },
                        "name_xpath": { "type": "string" },
                        "value_xpath": { "type": "string" }
                    },
                    "required": ["section_name", "name_xpath", "value_xpath"]
                }
            }
        },
        "required": ["sections"]
    })
});

/// 字段选择器的求值范围
///
/// 两种范围下传入的HTML都是整页。卡片范围在第一张匹配卡片的独立子树上校验，
/// 与抓取阶段每张卡片的求值根一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope<'a> {
    /// 目录页上的卡片，选择器相对卡片求值
    Card { card_xpath: &'a str },
    /// 整个详情页
    Page,
}

impl FieldScope<'_> {
    fn describe(&self) -> &'static str {
        match self {
            FieldScope::Card { .. } => {
                "the html of one item card from a catalog page. Xpaths are evaluated relative to \
                 the card, so start them with the card's own tag, e.g. /div/span"
            }
            FieldScope::Page => "the html of a web page that describes one item",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProposedStatic {
    name: String,
    xpath: String,
    #[serde(default)]
    extract_mode: ExtractMode,
}

#[derive(Debug, Deserialize)]
struct ProposedSection {
    section_name: String,
    name_xpath: String,
    value_xpath: String,
}

/// 数据字段提取器
///
/// 静态字段和动态字段分两轮询问，每个选择器都在片段上实际求值校验。
pub struct DataFieldsExtractor {
    agent: ModelAgent,
    compactor: HtmlCompactor,
    prompt_tokens: usize,
    max_retries: u32,
}

impl DataFieldsExtractor {
    pub fn new(
        agent: ModelAgent,
        compactor: HtmlCompactor,
        prompt_tokens: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            agent,
            compactor,
            prompt_tokens,
            max_retries,
        }
    }

    /// 提取静态字段和动态字段
    ///
    /// # 参数
    ///
    /// * `html` - 目录页或详情页的HTML
    /// * `scope` - 选择器的求值范围
    /// * `extra_prompt` - 调用方的补充说明
    pub async fn extract_fields(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        extra_prompt: Option<&str>,
    ) -> Result<WebpageFields, DiscoveryError> {
        let static_fields = self.static_pass(html, scope, extra_prompt).await?;
        let dynamic_fields = self
            .dynamic_pass(html, scope, extra_prompt, &static_fields)
            .await?;
        info!(
            "Found {} static and {} dynamic fields",
            static_fields.len(),
            dynamic_fields.len()
        );
        Ok(WebpageFields {
            static_fields,
            dynamic_fields,
        })
    }

    /// 按用户描述查找字段：先找静态字段，没有结果时再找动态字段
    pub async fn find_fields(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        description: &str,
    ) -> Result<WebpageFields, DiscoveryError> {
        let instructions = format!(
            "IMPORTANT! Search for fields that are described in the following very important \
             instructions: {}",
            description
        );
        let static_fields = self.static_pass(html, scope, Some(&instructions)).await?;
        if !static_fields.is_empty() {
            return Ok(WebpageFields {
                static_fields,
                dynamic_fields: Vec::new(),
            });
        }
        let dynamic_fields = self
            .dynamic_pass(html, scope, Some(&instructions), &[])
            .await?;
        Ok(WebpageFields {
            static_fields,
            dynamic_fields,
        })
    }

    /// 提示词中的HTML：压缩后的卡片或页面，不做长文本替换
    fn payload(&self, html: &str, scope: FieldScope<'_>) -> Result<String, DiscoveryError> {
        let options = MinifyOptions::default().without_substitutions();
        let minified = match scope {
            FieldScope::Card { card_xpath } => {
                let card = first_card(html, card_xpath)?
                    .ok_or(DiscoveryError::NotFound("catalog item"))?;
                self.compactor.minify_node(card.root(), &options)
            }
            FieldScope::Page => self.compactor.minify(html, &options),
        };
        Ok(self
            .compactor
            .chunk_text(&minified.html, self.prompt_tokens)
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn static_pass(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        extra_prompt: Option<&str>,
    ) -> Result<Vec<StaticField>, DiscoveryError> {
        let mut request = format!(
            "Here is {}:\n{}\n\n\
             Find the data fields of the item that have no label: title, price, image, link and \
             so on. For every field give a short snake_case name, an xpath and an extract_mode: \
             \"text\" for the text of the element, \"href\" for a link, \"src\" for an image. \
             Answer with JSON {{\"fields\": [{{\"name\": \"...\", \"xpath\": \"...\", \
             \"extract_mode\": \"text\"}}]}}.",
            scope.describe(),
            self.payload(html, scope)?
        );
        if let Some(extra) = extra_prompt {
            request.push_str(&format!("\n\n{}", extra));
        }
        let conversation = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)];
        self.agent
            .query(conversation, Some(&STATIC_SCHEMA), self.max_retries, |r| {
                static_answer(html, scope, r)
            })
            .await
    }

    async fn dynamic_pass(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        extra_prompt: Option<&str>,
        static_fields: &[StaticField],
    ) -> Result<Vec<DynamicField>, DiscoveryError> {
        let mut request = format!(
            "Here is {}:\n{}\n\n\
             Find sections of label/value pairs, for example a table of characteristics. For \
             every section give its name, an xpath selecting all labels and an xpath selecting \
             all values; both must select the same number of elements in the same order. \
             Answer with JSON {{\"sections\": [{{\"section_name\": \"...\", \"name_xpath\": \
             \"...\", \"value_xpath\": \"...\"}}]}}. Answer {{\"sections\": []}} if there are none.",
            scope.describe(),
            self.payload(html, scope)?
        );
        if !static_fields.is_empty() {
            let found = static_fields
                .iter()
                .map(|f| format!("{} ({})", f.name, f.xpath))
                .collect::<Vec<_>>()
                .join(", ");
            request.push_str(&format!(
                "\n\nYou have already found these static fields: {}. Do not add them.",
                found
            ));
        }
        if let Some(extra) = extra_prompt {
            request.push_str(&format!("\n\n{}", extra));
        }
        let conversation = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)];
        self.agent
            .query(conversation, Some(&DYNAMIC_SCHEMA), self.max_retries, |r| {
                dynamic_answer(html, scope, r)
            })
            .await
    }
}

/// 在给定范围的根节点上执行闭包，选择器按范围改写
fn with_scope<T>(
    html: &str,
    scope: FieldScope<'_>,
    f: impl FnOnce(NodeRef<'_, Node>, &dyn Fn(&str) -> String) -> Result<T, String>,
) -> Result<T, String> {
    match scope {
        FieldScope::Card { card_xpath } => {
            let card = first_card(html, card_xpath)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Card xpath {} finds nothing", card_xpath))?;
            f(card.root(), &|x: &str| relativize(x).into_owned())
        }
        FieldScope::Page => {
            let document = Html::parse_document(html);
            f(document.tree.root(), &|x: &str| x.trim().to_string())
        }
    }
}

fn static_answer(
    html: &str,
    scope: FieldScope<'_>,
    response: &ModelResponse,
) -> Result<Vec<StaticField>, String> {
    let value = response.json()?;
    let proposed: Vec<ProposedStatic> = serde_json::from_value(
        value.get("fields").cloned().unwrap_or(Value::Array(Vec::new())),
    )
    .map_err(|e| format!("\"fields\" has a wrong format: {}", e))?;

    let mut names = HashSet::new();
    with_scope(html, scope, |root, prepare| {
        let mut fields = Vec::with_capacity(proposed.len());
        for field in proposed {
            let name = field.name.trim().to_string();
            if name.is_empty() {
                return Err(format!("Field with xpath {} has an empty name", field.xpath));
            }
            if !names.insert(name.clone()) {
                return Err(format!("Field name {} is used more than once", name));
            }
            let sample = DomExtractor::extract_by_xpath(root, &prepare(&field.xpath), field.extract_mode)
                .map_err(|e| format!("Field {}: {}", name, e))?;
            let Some(sample) = sample else {
                return Err(format!(
                    "Field {}: xpath {} with extract_mode {:?} finds nothing",
                    name, field.xpath, field.extract_mode
                ));
            };
            fields.push(StaticField {
                name,
                xpath: field.xpath.trim().to_string(),
                extract_mode: field.extract_mode,
                sample_value: Some(sample),
                color: None,
            });
        }
        Ok(fields)
    })
}

fn dynamic_answer(
    html: &str,
    scope: FieldScope<'_>,
    response: &ModelResponse,
) -> Result<Vec<DynamicField>, String> {
    let value = response.json()?;
    let proposed: Vec<ProposedSection> = serde_json::from_value(
        value.get("sections").cloned().unwrap_or(Value::Array(Vec::new())),
    )
    .map_err(|e| format!("\"sections\" has a wrong format: {}", e))?;

    with_scope(html, scope, |root, prepare| {
        let mut sections = Vec::with_capacity(proposed.len());
        for section in proposed {
            let pairs = DomExtractor::extract_paired(
                root,
                &prepare(&section.name_xpath),
                &prepare(&section.value_xpath),
            )
            .map_err(|e| format!("Section {}: {}", section.section_name, e))?;
            if pairs.is_empty() {
                return Err(format!(
                    "Section {}: name_xpath {} finds nothing",
                    section.section_name, section.name_xpath
                ));
            }
            sections.push(DynamicField {
                section_name: section.section_name,
                name_xpath: section.name_xpath.trim().to_string(),
                value_xpath: section.value_xpath.trim().to_string(),
                sample_values: pairs,
                color: None,
            });
        }
        Ok(sections)
    })
}
