// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{DriverError, PageDriver};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";
const DOCUMENT_HEIGHT: &str = "document.documentElement.scrollHeight";

/// Chrome驱动
///
/// 通过DevTools协议（chromiumoxide）控制远程浏览器中的一个页面，
/// 页面的target id即会话id。
pub struct ChromeDriver {
    page: Page,
    session_id: String,
}

impl ChromeDriver {
    pub fn new(page: Page) -> Self {
        let session_id = page.target_id().inner().clone();
        Self { page, session_id }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn browser_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

#[async_trait]
impl PageDriver for ChromeDriver {
    fn name(&self) -> &'static str {
        "chrome"
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        // goto waits for the load event
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        self.page.content().await.map_err(browser_error)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.page
            .url()
            .await
            .map_err(browser_error)?
            .ok_or(DriverError::NoPage)
    }

    async fn click(&self, xpath: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_xpath(xpath)
            .await
            .map_err(|e| DriverError::ElementNotFound(format!("{}: {}", xpath, e)))?;
        element.click().await.map_err(browser_error)?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<String, DriverError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = self.page.screenshot(params).await.map_err(browser_error)?;
        Ok(BASE64.encode(bytes))
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.page
            .evaluate(SCROLL_TO_BOTTOM)
            .await
            .map_err(browser_error)?;
        Ok(())
    }

    async fn document_height(&self) -> Result<u64, DriverError> {
        let height: f64 = self
            .page
            .evaluate(DOCUMENT_HEIGHT)
            .await
            .map_err(browser_error)?
            .into_value()
            .map_err(browser_error)?;
        Ok(height.max(0.0) as u64)
    }

    async fn quit(&self) -> Result<(), DriverError> {
        tracing::debug!("Closing browser page {}", self.session_id);
        self.page.clone().close().await.map_err(browser_error)
    }
}
