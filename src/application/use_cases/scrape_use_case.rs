// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ScrapingSettings;
use crate::domain::models::{Pagination, Record, ScraperConfig, WebpageType};
use crate::domain::services::extraction_service::{DomExtractor, ExtractionError};
use crate::engines::page_switcher::{PageSwitcher, SwitchDelays};
use crate::engines::traits::{DriverError, PageDriver};
use crate::utils::url_utils;
use futures::{Stream, TryStreamExt};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// 抓取错误类型
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// 该页面类型不能抓取
    #[error("Page type {0} cannot be scraped")]
    UnsupportedPageType(WebpageType),
    /// 目录页缺少卡片配置
    #[error("Catalog item is not configured")]
    MissingCatalogItem,
    /// 打开嵌套页面需要链接选择器
    #[error("Url xpath of the catalog item is not configured")]
    MissingUrlXpath,
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// 抓取引擎
///
/// 按配置驱动一个已租用的会话，惰性地产出记录。
#[derive(Debug, Clone)]
pub struct ScrapeEngine {
    delays: SwitchDelays,
    navigation_delay: Duration,
}

impl ScrapeEngine {
    pub fn new(delays: SwitchDelays, navigation_delay: Duration) -> Self {
        Self {
            delays,
            navigation_delay,
        }
    }

    pub fn from_settings(settings: &ScrapingSettings) -> Self {
        Self::new(SwitchDelays::from(settings), settings.navigation_delay())
    }

    /// 按页面类型创建记录迭代器
    ///
    /// * 详情页 - 打开起始URL并整页提取
    /// * 目录页 + 打开嵌套页面 - 先收集所有链接，再逐个打开整页提取
    /// * 目录页 - 逐页提取卡片
    /// * 其他/验证码 - `ScrapeError::UnsupportedPageType`
    pub fn scrape<'a>(
        &self,
        config: &'a ScraperConfig,
        driver: &'a dyn PageDriver,
    ) -> Result<PageIterator<'a>, ScrapeError> {
        let mode = match config.page_type {
            WebpageType::Details => Mode::NestedPages {
                pending: VecDeque::from([config.start_url.clone()]),
                collect_from: None,
            },
            WebpageType::Catalog => {
                let item = config
                    .catalog_item
                    .as_ref()
                    .ok_or(ScrapeError::MissingCatalogItem)?;
                if config.open_nested_pages {
                    let url_xpath = item
                        .url_xpath
                        .as_deref()
                        .ok_or(ScrapeError::MissingUrlXpath)?;
                    Mode::NestedPages {
                        pending: VecDeque::new(),
                        collect_from: Some(url_xpath),
                    }
                } else {
                    Mode::CatalogItems {
                        card_xpath: &item.card_xpath,
                    }
                }
            }
            other => return Err(ScrapeError::UnsupportedPageType(other)),
        };
        info!(
            "Scraping {} ({}, {})",
            config.start_url, config.page_type, config.pagination
        );
        Ok(self.iterator(config, driver, mode))
    }

    /// 收集所有嵌套页面的链接（跨页去重，最多 `max_rows` 个）
    pub async fn nested_urls(
        &self,
        config: &ScraperConfig,
        driver: &dyn PageDriver,
    ) -> Result<Vec<String>, ScrapeError> {
        let url_xpath = config
            .catalog_item
            .as_ref()
            .ok_or(ScrapeError::MissingCatalogItem)?
            .url_xpath
            .as_deref()
            .ok_or(ScrapeError::MissingUrlXpath)?;
        let mut iterator = self.iterator(
            config,
            driver,
            Mode::NestedPages {
                pending: VecDeque::new(),
                collect_from: None,
            },
        );
        Ok(iterator.collect_urls(url_xpath).await?.into())
    }

    fn iterator<'a>(
        &self,
        config: &'a ScraperConfig,
        driver: &'a dyn PageDriver,
        mode: Mode<'a>,
    ) -> PageIterator<'a> {
        PageIterator {
            config,
            driver,
            switcher: PageSwitcher::new(config.pagination.clone(), self.delays),
            navigation_delay: self.navigation_delay,
            mode,
            buffer: VecDeque::new(),
            yielded: 0,
            page_number: 0,
            started: false,
            finished: false,
            cards_seen: 0,
        }
    }

    /// 抓取并收集全部记录
    pub async fn scrape_all(
        &self,
        config: &ScraperConfig,
        driver: &dyn PageDriver,
    ) -> Result<Vec<Record>, ScrapeError> {
        self.scrape(config, driver)?.into_stream().try_collect().await
    }
}

enum Mode<'a> {
    CatalogItems {
        card_xpath: &'a str,
    },
    NestedPages {
        pending: VecDeque<String>,
        collect_from: Option<&'a str>,
    },
}

/// 记录迭代器
///
/// 只能从起始URL重新开始，不能在中途恢复；同一个迭代器不应被并发消费。
pub struct PageIterator<'a> {
    config: &'a ScraperConfig,
    driver: &'a dyn PageDriver,
    switcher: PageSwitcher,
    navigation_delay: Duration,
    mode: Mode<'a>,
    buffer: VecDeque<Record>,
    yielded: usize,
    page_number: usize,
    started: bool,
    finished: bool,
    cards_seen: usize,
}

impl<'a> PageIterator<'a> {
    /// 已产出的记录数
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// 已加载的目录页数
    pub fn pages_loaded(&self) -> usize {
        self.page_number
    }

    /// 下一条记录；`Ok(None)` 表示结束
    pub async fn next_record(&mut self) -> Result<Option<Record>, ScrapeError> {
        if self.yielded >= self.config.max_rows {
            return Ok(None);
        }
        let record = match &self.mode {
            Mode::CatalogItems { card_xpath } => {
                let card_xpath = *card_xpath;
                self.next_card(card_xpath).await?
            }
            Mode::NestedPages { .. } => self.next_nested_page().await?,
        };
        if record.is_some() {
            self.yielded += 1;
        }
        Ok(record)
    }

    /// 转换为异步流
    pub fn into_stream(self) -> impl Stream<Item = Result<Record, ScrapeError>> + Send + 'a {
        futures::stream::try_unfold(self, |mut iterator| async move {
            Ok(iterator
                .next_record()
                .await?
                .map(|record| (record, iterator)))
        })
    }

    async fn next_card(&mut self, card_xpath: &str) -> Result<Option<Record>, ScrapeError> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(html) = self.load_next_page().await? else {
                return Ok(None);
            };
            let records = DomExtractor::extract_items(&html, card_xpath, &self.config.fields)?;
            let total = records.len();
            // Infinite scroll keeps the cards of earlier pages in the document
            let skip = match self.config.pagination {
                Pagination::Scroll => self.cards_seen.min(total),
                _ => 0,
            };
            self.cards_seen = total;
            debug!(
                "Page {}: {} cards, {} new",
                self.page_number,
                total,
                total - skip
            );
            self.buffer.extend(records.into_iter().skip(skip));
        }
    }

    async fn next_nested_page(&mut self) -> Result<Option<Record>, ScrapeError> {
        let collect_from = match &mut self.mode {
            Mode::NestedPages { collect_from, .. } => collect_from.take(),
            Mode::CatalogItems { .. } => None,
        };
        if let Some(url_xpath) = collect_from {
            let urls = self.collect_urls(url_xpath).await?;
            if let Mode::NestedPages { pending, .. } = &mut self.mode {
                *pending = urls;
            }
        }

        let next_url = match &mut self.mode {
            Mode::NestedPages { pending, .. } => pending.pop_front(),
            Mode::CatalogItems { .. } => None,
        };
        let Some(url) = next_url else {
            return Ok(None);
        };
        self.driver.navigate(&url).await?;
        tokio::time::sleep(self.navigation_delay).await;
        let html = self.driver.page_source().await?;
        let mut record = Record::new();
        record.insert("url".to_string(), Value::String(url));
        let record = DomExtractor::extract_page_into(&html, &self.config.fields, record)?;
        metrics::counter!("pageshape_pages_scraped_total").increment(1);
        Ok(Some(record))
    }

    async fn collect_urls(&mut self, url_xpath: &str) -> Result<VecDeque<String>, ScrapeError> {
        let mut seen = HashSet::new();
        let mut urls = VecDeque::new();
        'pages: while let Some(html) = self.load_next_page().await? {
            for href in DomExtractor::link_values(&html, url_xpath)? {
                let url = url_utils::resolve_href(&self.config.start_url, &href);
                if seen.insert(url.clone()) {
                    urls.push_back(url);
                    if urls.len() >= self.config.max_rows {
                        break 'pages;
                    }
                }
            }
            debug!("Collected {} nested urls after page {}", urls.len(), self.page_number);
        }
        info!("Collected {} nested urls", urls.len());
        Ok(urls)
    }

    /// 加载下一页目录：第一次打开起始URL，之后按分页方式翻页
    async fn load_next_page(&mut self) -> Result<Option<String>, ScrapeError> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            self.driver.navigate(&self.config.start_url).await?;
            tokio::time::sleep(self.navigation_delay).await;
        } else if self.page_number >= self.config.max_pages
            || !self.switcher.switch_page(self.driver).await
        {
            debug!("Pagination finished after {} pages", self.page_number);
            self.finished = true;
            return Ok(None);
        }
        self.page_number += 1;
        metrics::counter!("pageshape_pages_scraped_total").increment(1);
        Ok(Some(self.driver.page_source().await?))
    }
}

#[cfg(test)]
#[path = "scrape_use_case_test.rs"]
mod tests;
