// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ScrapingSettings;
use crate::domain::models::Pagination;
use crate::engines::traits::{DriverError, PageDriver};
use crate::utils::url_utils;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// 翻页时的等待时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchDelays {
    /// 点击或导航之后
    pub settle: Duration,
    /// 滚动之后
    pub scroll: Duration,
    /// 高度未变化时，再次检查之前
    pub scroll_retry: Duration,
}

impl SwitchDelays {
    pub fn none() -> Self {
        Self {
            settle: Duration::ZERO,
            scroll: Duration::ZERO,
            scroll_retry: Duration::ZERO,
        }
    }
}

impl From<&ScrapingSettings> for SwitchDelays {
    fn from(settings: &ScrapingSettings) -> Self {
        Self {
            settle: settings.settle_delay(),
            scroll: settings.scroll_delay(),
            scroll_retry: settings.scroll_retry_delay(),
        }
    }
}

/// 翻页器
///
/// 对 `Pagination` 的每个变体实现一次翻页；返回false表示没有更多页面。
/// 驱动错误在这里被捕获并视为分页结束。
pub struct PageSwitcher {
    pagination: Pagination,
    delays: SwitchDelays,
    cursor: usize,
    last_hash: Option<String>,
}

impl PageSwitcher {
    pub fn new(pagination: Pagination, delays: SwitchDelays) -> Self {
        Self {
            pagination,
            delays,
            cursor: 0,
            last_hash: None,
        }
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// 切换到下一页
    ///
    /// # 返回值
    ///
    /// * `true` - 已切换到新页面
    /// * `false` - 没有更多页面（包括驱动报错）
    pub async fn switch_page(&mut self, driver: &dyn PageDriver) -> bool {
        match self.try_switch(driver).await {
            Ok(switched) => switched,
            Err(e) => {
                warn!("Page switch failed, treating as last page: {}", e);
                false
            }
        }
    }

    async fn try_switch(&mut self, driver: &dyn PageDriver) -> Result<bool, DriverError> {
        match &self.pagination {
            Pagination::Xpath { xpath } => {
                driver.click(xpath).await?;
                tokio::time::sleep(self.delays.settle).await;
                Ok(true)
            }
            Pagination::Scroll => {
                let before = driver.document_height().await?;
                driver.scroll_to_bottom().await?;
                tokio::time::sleep(self.delays.scroll).await;
                if driver.document_height().await? > before {
                    return Ok(true);
                }
                tokio::time::sleep(self.delays.scroll_retry).await;
                let after = driver.document_height().await?;
                debug!("Document height {} -> {}", before, after);
                Ok(after > before)
            }
            Pagination::UrlParam {
                param_name,
                first_value,
            } => {
                let previous = match self.last_hash.take() {
                    Some(hash) => hash,
                    None => page_hash(&driver.page_source().await?),
                };
                let current_url = driver.current_url().await?;
                let current = url_utils::get_url_query_param_value(&current_url, param_name)
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(*first_value);
                let next_url = url_utils::add_or_replace_url_param(
                    &current_url,
                    param_name,
                    &(current + 1).to_string(),
                )
                .map_err(|e| DriverError::Navigation {
                    url: current_url.clone(),
                    reason: e.to_string(),
                })?;
                driver.navigate(&next_url).await?;
                tokio::time::sleep(self.delays.settle).await;

                let hash = page_hash(&driver.page_source().await?);
                if hash == previous {
                    debug!("Page {} is identical to the previous one", next_url);
                    return Ok(false);
                }
                self.last_hash = Some(hash);
                Ok(true)
            }
            Pagination::Urls { urls } => {
                let Some(url) = urls.get(self.cursor) else {
                    return Ok(false);
                };
                self.cursor += 1;
                driver.navigate(url).await?;
                tokio::time::sleep(self.delays.settle).await;
                Ok(true)
            }
            Pagination::None => Ok(false),
        }
    }
}

fn page_hash(html: &str) -> String {
    hex::encode(Sha256::digest(html.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// 按URL返回固定页面的驱动
    #[derive(Default)]
    struct FakeDriver {
        pages: HashMap<String, String>,
        current: Mutex<String>,
        visited: Mutex<Vec<String>>,
        heights: Mutex<Vec<u64>>,
        clickable: bool,
    }

    #[async_trait]
    impl PageDriver for FakeDriver {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.visited.lock().push(url.to_string());
            *self.current.lock() = url.to_string();
            Ok(())
        }

        async fn page_source(&self) -> Result<String, DriverError> {
            let current = self.current.lock().clone();
            Ok(self.pages.get(&current).cloned().unwrap_or_default())
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.current.lock().clone())
        }

        async fn click(&self, xpath: &str) -> Result<(), DriverError> {
            if self.clickable {
                Ok(())
            } else {
                Err(DriverError::ElementNotFound(xpath.to_string()))
            }
        }

        async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn document_height(&self) -> Result<u64, DriverError> {
            let mut heights = self.heights.lock();
            Ok(if heights.len() > 1 {
                heights.remove(0)
            } else {
                heights.first().copied().unwrap_or(0)
            })
        }
    }

    #[tokio::test]
    async fn test_urls_list_returns_true_true_false() {
        let driver = FakeDriver::default();
        let mut switcher = PageSwitcher::new(
            Pagination::Urls {
                urls: vec!["https://a.example/".to_string(), "https://b.example/".to_string()],
            },
            SwitchDelays::none(),
        );
        assert!(switcher.switch_page(&driver).await);
        assert!(switcher.switch_page(&driver).await);
        assert!(!switcher.switch_page(&driver).await);
        assert_eq!(
            *driver.visited.lock(),
            vec!["https://a.example/", "https://b.example/"]
        );
    }

    #[tokio::test]
    async fn test_click_failure_ends_pagination() {
        let driver = FakeDriver::default();
        let mut switcher = PageSwitcher::new(
            Pagination::Xpath {
                xpath: "//a[@class='next']".to_string(),
            },
            SwitchDelays::none(),
        );
        assert!(!switcher.switch_page(&driver).await);

        let driver = FakeDriver {
            clickable: true,
            ..FakeDriver::default()
        };
        assert!(switcher.switch_page(&driver).await);
    }

    #[tokio::test]
    async fn test_scroll_compares_heights_with_one_retry() {
        let driver = FakeDriver::default();
        *driver.heights.lock() = vec![1000, 1000, 1600];
        let mut switcher = PageSwitcher::new(Pagination::Scroll, SwitchDelays::none());
        assert!(switcher.switch_page(&driver).await);

        *driver.heights.lock() = vec![1600, 1600, 1600];
        assert!(!switcher.switch_page(&driver).await);
    }

    #[tokio::test]
    async fn test_url_param_stops_on_identical_page() {
        let base = "https://shop.example/list";
        let mut pages = HashMap::new();
        pages.insert(base.to_string(), "page one".to_string());
        pages.insert(format!("{}?page=2", base), "page two".to_string());
        pages.insert(format!("{}?page=3", base), "page two".to_string());
        let driver = FakeDriver {
            pages,
            ..FakeDriver::default()
        };
        driver.navigate(base).await.unwrap();

        let mut switcher = PageSwitcher::new(
            Pagination::UrlParam {
                param_name: "page".to_string(),
                first_value: 1,
            },
            SwitchDelays::none(),
        );
        assert!(switcher.switch_page(&driver).await);
        assert_eq!(driver.current_url().await.unwrap(), format!("{}?page=2", base));
        assert!(!switcher.switch_page(&driver).await);
        assert_eq!(driver.current_url().await.unwrap(), format!("{}?page=3", base));
    }

    #[tokio::test]
    async fn test_no_pagination() {
        let driver = FakeDriver::default();
        let mut switcher = PageSwitcher::new(Pagination::None, SwitchDelays::none());
        assert!(!switcher.switch_page(&driver).await);
        assert!(driver.visited.lock().is_empty());
    }
}
