// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use parking_lot::Mutex;
use pageshape::domain::models::{
    CatalogItem, ExtractMode, Pagination, ScraperConfig, StaticField, WebpageFields, WebpageType,
};
use pageshape::domain::services::llm_service::{
    ChatMessage, LanguageModel, LlmError, ModelResponse,
};
use pageshape::engines::traits::{DriverError, PageDriver};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const START: &str = "https://shop.example/catalog";

/// 确定性的内存站点
///
/// 每个目录页都有一个 `a.next` 控件，点击后跳转到链表中的下一页。
#[derive(Default, Clone)]
pub struct MockSite {
    pages: HashMap<String, String>,
    next: HashMap<String, String>,
}

impl MockSite {
    /// 把 `cards` 张卡片按每页 `per_page` 张分布在多个目录页上
    pub fn catalog(cards: u32, per_page: u32) -> Self {
        let mut site = MockSite::default();
        let mut url = START.to_string();
        let mut first = 1;
        let mut page = 1;
        while first <= cards {
            let last = (first + per_page - 1).min(cards);
            site.pages.insert(url.clone(), catalog_page(first..=last));
            for id in first..=last {
                site.pages
                    .insert(format!("https://shop.example/p/{}", id), product_page(id));
            }
            first = last + 1;
            page += 1;
            if first <= cards {
                let next = format!("{}/{}", START, page);
                site.next.insert(url.clone(), next.clone());
                url = next;
            }
        }
        site
    }

    /// 单页目录，卡片是表格行
    pub fn table_catalog(rows: u32) -> Self {
        let mut site = MockSite::default();
        site.pages.insert(START.to_string(), table_page(1..=rows));
        site
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver {
            site: self.clone(),
            current: Mutex::new(String::new()),
            navigations: AtomicUsize::new(0),
            clicks: AtomicUsize::new(0),
        }
    }
}

pub struct MockDriver {
    site: MockSite,
    current: Mutex<String>,
    pub navigations: AtomicUsize,
    pub clicks: AtomicUsize,
}

impl MockDriver {
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    fn current(&self) -> String {
        self.current.lock().clone()
    }

    fn set_current(&self, url: &str) {
        *self.current.lock() = url.to_string();
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        self.set_current(url);
        Ok(())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        let current = self.current();
        self.site
            .pages
            .get(&current)
            .cloned()
            .ok_or(DriverError::Navigation {
                url: current,
                reason: "HTTP 404".to_string(),
            })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.current())
    }

    async fn click(&self, xpath: &str) -> Result<(), DriverError> {
        self.clicks.fetch_add(1, Ordering::SeqCst);
        match self.site.next.get(&self.current()) {
            Some(next) => {
                self.set_current(next);
                Ok(())
            }
            None => Err(DriverError::ElementNotFound(xpath.to_string())),
        }
    }
}

pub fn catalog_page(ids: std::ops::RangeInclusive<u32>) -> String {
    let cards: String = ids
        .map(|id| {
            format!(
                r#"<div class="card"><h4><a href="/p/{id}">Item {id}</a></h4><span class="price">{id}.99</span></div>"#
            )
        })
        .collect();
    format!(
        r#"<html><head><title>Catalog</title></head><body><div class="grid">{}</div><a class="next">Next</a></body></html>"#,
        cards
    )
}

pub fn table_page(ids: std::ops::RangeInclusive<u32>) -> String {
    let rows: String = ids
        .map(|id| {
            format!(
                r#"<tr class="row"><td><a href="/p/{id}">Item {id}</a></td><td class="price">{id}.99</td></tr>"#
            )
        })
        .collect();
    format!(
        r#"<html><body><table class="goods"><tbody>{}</tbody></table><a class="next">Next</a></body></html>"#,
        rows
    )
}

pub fn product_page(id: u32) -> String {
    format!(
        r#"<html><body><h1>Item {id}</h1><dl><dt>Weight</dt><dd>{id} kg</dd><dt>Color</dt><dd>Blue</dd></dl></body></html>"#
    )
}

/// 回放手写的卡片配置
pub fn catalog_config(max_pages: usize, max_rows: usize) -> ScraperConfig {
    let field = |name: &str, xpath: &str| StaticField {
        name: name.to_string(),
        xpath: xpath.to_string(),
        extract_mode: ExtractMode::Text,
        sample_value: None,
        color: None,
    };
    ScraperConfig {
        pagination: Pagination::Xpath {
            xpath: "//a[@class='next']".to_string(),
        },
        catalog_item: Some(CatalogItem {
            card_xpath: "//div[@class='card']".to_string(),
            url_xpath: Some("//div[@class='card']/h4/a".to_string()),
            html_snippet: String::new(),
            urls_on_page: Vec::new(),
        }),
        fields: WebpageFields {
            static_fields: vec![field("title", "//h4/a"), field("price", "//span")],
            dynamic_fields: Vec::new(),
        },
        max_pages,
        max_rows,
        ..ScraperConfig::new(START, WebpageType::Catalog)
    }
}

/// 按脚本回答的模型
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelResponse>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn json(replies: Vec<Value>) -> Self {
        Self::new(replies.into_iter().map(ModelResponse::Json).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _json_schema: Option<&Value>,
    ) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Parse("script exhausted".to_string()))
    }
}
