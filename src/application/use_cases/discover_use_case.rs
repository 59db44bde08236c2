// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ScrapingSettings;
use crate::domain::models::{
    assign_colors, CatalogItem, Pagination, ScraperConfig, WebpageFields, WebpageType,
};
use crate::domain::services::data_fields_extractor::FieldScope;
use crate::domain::services::model_agent::DiscoveryError;
use crate::domain::services::parser_ai::ParserAi;
use crate::engines::traits::{DriverError, PageDriver};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 字段高亮颜色
pub const FIELD_PALETTE: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#800000", "#aaffc3", "#808000",
];

/// 发现错误类型
#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// 调用方对某一步结果的审阅
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review<T> {
    /// 接受结果
    Accept,
    /// 用给定的值替换结果
    Override(T),
    /// 用自然语言纠正，该步骤带着这段文字重新执行
    Correct(String),
}

/// 手动指定的目录卡片选择器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSelectors {
    pub card_xpath: String,
    pub url_xpath: Option<String>,
}

/// 发现过程的审阅回调
///
/// 每一步都会展示结果并等待审阅；只有 `Accept` 和 `Override` 结束该步骤。
/// 默认实现全部接受。
#[async_trait]
pub trait DiscoveryReviewer: Send + Sync {
    async fn review_page_type(&self, _page_type: WebpageType) -> Review<WebpageType> {
        Review::Accept
    }

    async fn review_pagination(&self, _pagination: &Pagination) -> Review<Pagination> {
        Review::Accept
    }

    async fn review_catalog_item(&self, _item: &CatalogItem) -> Review<CatalogSelectors> {
        Review::Accept
    }

    async fn review_fields(&self, _fields: &WebpageFields) -> Review<WebpageFields> {
        Review::Accept
    }
}

/// 无人值守时使用的审阅者
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl DiscoveryReviewer for AcceptAll {}

/// 结构发现用例
///
/// 打开起始页面，依次确定页面类型、分页、目录卡片和字段，
/// 产出一份可回放的 `ScraperConfig`。
pub struct DiscoverUseCase {
    parser: Arc<ParserAi>,
    navigation_delay: Duration,
    default_max_pages: usize,
    default_max_rows: usize,
}

impl DiscoverUseCase {
    pub fn new(parser: Arc<ParserAi>, settings: &ScrapingSettings) -> Self {
        Self {
            parser,
            navigation_delay: settings.navigation_delay(),
            default_max_pages: settings.default_max_pages,
            default_max_rows: settings.default_max_rows,
        }
    }

    /// 执行发现流程
    ///
    /// # 参数
    ///
    /// * `start_url` - 起始页面
    /// * `driver` - 已租用的浏览器会话
    /// * `reviewer` - 每一步的审阅回调
    /// * `open_nested_pages` - 目录页是否逐个打开卡片链接抓取详情
    ///
    /// # 返回值
    ///
    /// * `Ok(ScraperConfig)` - 发现结果
    /// * `Err(DiscoverError)` - 模型或驱动错误
    pub async fn discover(
        &self,
        start_url: &str,
        driver: &dyn PageDriver,
        reviewer: &dyn DiscoveryReviewer,
        open_nested_pages: bool,
    ) -> Result<ScraperConfig, DiscoverError> {
        info!("Discovering structure of {}", start_url);
        let html = self.open(driver, start_url).await?;
        let screenshot = self.screenshot(driver).await;

        let page_type = self
            .page_type_step(&html, screenshot.as_deref(), reviewer)
            .await?;
        let mut config = ScraperConfig::new(start_url, page_type);
        config.max_rows = self.default_max_rows;

        match page_type {
            WebpageType::Catalog => {
                let pagination = self.pagination_step(&html, reviewer).await?;
                match self.catalog_step(&html, start_url, reviewer).await {
                    Ok(item) => {
                        let fields = if open_nested_pages {
                            self.nested_fields(driver, &item, reviewer).await?
                        } else {
                            let scope = FieldScope::Card {
                                card_xpath: &item.card_xpath,
                            };
                            self.fields_step(&html, scope, reviewer).await?
                        };
                        config.max_pages = if pagination == Pagination::None {
                            1
                        } else {
                            self.default_max_pages
                        };
                        config.pagination = pagination;
                        config.open_nested_pages = open_nested_pages && item.url_xpath.is_some();
                        config.catalog_item = Some(item);
                        config.fields = fields;
                    }
                    Err(DiscoveryError::NotFound(what)) => {
                        info!("No {} on {}, treating it as a details page", what, start_url);
                        config.page_type = WebpageType::Details;
                        config.fields = self
                            .details_fields(&html, screenshot.as_deref(), reviewer)
                            .await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            WebpageType::Details => {
                config.fields = self
                    .details_fields(&html, screenshot.as_deref(), reviewer)
                    .await?;
            }
            WebpageType::Other | WebpageType::Captcha => {
                warn!("Page {} is {}, nothing to discover", start_url, page_type);
            }
        }

        let (fields, _) = assign_colors(std::mem::take(&mut config.fields), FIELD_PALETTE, 0);
        config.fields = fields;
        info!(
            "Discovery finished: {} with {} fields",
            config.page_type,
            config.fields.len()
        );
        Ok(config)
    }

    async fn open(&self, driver: &dyn PageDriver, url: &str) -> Result<String, DriverError> {
        driver.navigate(url).await?;
        tokio::time::sleep(self.navigation_delay).await;
        driver.page_source().await
    }

    async fn screenshot(&self, driver: &dyn PageDriver) -> Option<String> {
        if !self.parser.has_vision() {
            return None;
        }
        match driver.screenshot().await {
            Ok(screenshot) => Some(screenshot),
            Err(e) => {
                debug!("Screenshot unavailable: {}", e);
                None
            }
        }
    }

    async fn page_type_step(
        &self,
        html: &str,
        screenshot: Option<&str>,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<WebpageType, DiscoveryError> {
        let mut page_type = self.parser.classify_page(html, screenshot).await?;
        loop {
            match reviewer.review_page_type(page_type).await {
                Review::Accept => return Ok(page_type),
                Review::Override(value) => return Ok(value),
                Review::Correct(text) => {
                    page_type = match text.parse() {
                        Ok(value) => value,
                        Err(_) => self.parser.classify_page(html, screenshot).await?,
                    };
                }
            }
        }
    }

    async fn pagination_step(
        &self,
        html: &str,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<Pagination, DiscoveryError> {
        let mut pagination = self.parser.detect_pagination(html).await;
        loop {
            info!("{}", pagination);
            match reviewer.review_pagination(&pagination).await {
                Review::Accept => return Ok(pagination),
                Review::Override(value) => return Ok(value),
                Review::Correct(text) => {
                    pagination = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        Err(_) => self.parser.detect_pagination(html).await,
                    };
                }
            }
        }
    }

    async fn catalog_step(
        &self,
        html: &str,
        base_url: &str,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<CatalogItem, DiscoveryError> {
        let mut item = self.parser.detect_catalog_item(html, base_url, None).await?;
        loop {
            match reviewer.review_catalog_item(&item).await {
                Review::Accept => return Ok(item),
                Review::Override(selectors) => {
                    match self.parser.manually_change_catalog_item(
                        html,
                        &selectors.card_xpath,
                        selectors.url_xpath.as_deref(),
                        base_url,
                    ) {
                        Ok(changed) => return Ok(changed),
                        Err(e) => warn!("Rejected catalog selectors: {}", e),
                    }
                }
                Review::Correct(text) => {
                    item = self
                        .parser
                        .detect_catalog_item(html, base_url, Some(&text))
                        .await?;
                }
            }
        }
    }

    async fn fields_step(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<WebpageFields, DiscoveryError> {
        let mut fields = self.parser.extract_fields(html, scope, None).await?;
        loop {
            match reviewer.review_fields(&fields).await {
                Review::Accept => return Ok(fields),
                Review::Override(value) => return Ok(value),
                Review::Correct(text) => {
                    let found = self.parser.find_fields(html, scope, &text).await?;
                    merge_fields(&mut fields, found);
                }
            }
        }
    }

    async fn details_fields(
        &self,
        html: &str,
        screenshot: Option<&str>,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<WebpageFields, DiscoveryError> {
        let summary = self.parser.summarize_page(html, screenshot).await?;
        self.fields_step(&summary, FieldScope::Page, reviewer).await
    }

    async fn nested_fields(
        &self,
        driver: &dyn PageDriver,
        item: &CatalogItem,
        reviewer: &dyn DiscoveryReviewer,
    ) -> Result<WebpageFields, DiscoverError> {
        let Some(url) = item.urls_on_page.first() else {
            return Err(DiscoveryError::NotFound("nested page url").into());
        };
        info!("Discovering fields on nested page {}", url);
        let html = self.open(driver, url).await?;
        let screenshot = self.screenshot(driver).await;
        Ok(self
            .details_fields(&html, screenshot.as_deref(), reviewer)
            .await?)
    }
}

/// 合并按描述找到的字段：同名静态字段和同名分区不重复添加
fn merge_fields(fields: &mut WebpageFields, found: WebpageFields) {
    for field in found.static_fields {
        if !fields.static_fields.iter().any(|f| f.name == field.name) {
            fields.static_fields.push(field);
        }
    }
    for section in found.dynamic_fields {
        if !fields
            .dynamic_fields
            .iter()
            .any(|s| s.section_name == section.section_name)
        {
            fields.dynamic_fields.push(section);
        }
    }
}

#[cfg(test)]
#[path = "discover_use_case_test.rs"]
mod tests;
