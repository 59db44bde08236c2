// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::engines::traits::{DriverError, PageDriver};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; pageshape/1.0)";

struct LoadedPage {
    url: String,
    html: String,
}

/// HTTP驱动
///
/// 基于reqwest的纯HTTP抓取：只能导航和读取源码，不执行JavaScript，
/// 因此也不能点击、截图或滚动。
pub struct HttpDriver {
    client: reqwest::Client,
    page: Mutex<Option<LoadedPage>>,
}

impl HttpDriver {
    /// 创建HTTP驱动
    ///
    /// # 参数
    ///
    /// * `timeout` - 单次请求超时
    pub fn new(timeout: Duration) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            page: Mutex::new(None),
        })
    }
}

#[async_trait]
impl PageDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        let final_url = response.url().to_string();
        let html = response.text().await?;
        tracing::debug!(
            "Fetched {} ({} bytes) in {}ms",
            final_url,
            html.len(),
            start.elapsed().as_millis()
        );
        *self.page.lock() = Some(LoadedPage {
            url: final_url,
            html,
        });
        Ok(())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        self.page
            .lock()
            .as_ref()
            .map(|p| p.html.clone())
            .ok_or(DriverError::NoPage)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.page
            .lock()
            .as_ref()
            .map(|p| p.url.clone())
            .ok_or(DriverError::NoPage)
    }
}

#[cfg(test)]
#[path = "reqwest_engine_test.rs"]
mod tests;
