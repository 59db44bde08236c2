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

use async_trait::async_trait;
use thiserror::Error;

/// 驱动错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 驱动不具备该能力
    #[error("{driver} does not support {capability}")]
    UnsupportedCapability {
        driver: &'static str,
        capability: &'static str,
    },
    /// 导航失败
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    /// 还没有加载任何页面
    #[error("No page has been loaded yet")]
    NoPage,
    /// 元素不存在
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 浏览器协议错误
    #[error("Browser error: {0}")]
    Browser(String),
    /// 超时
    #[error("Timeout")]
    Timeout,
}

impl DriverError {
    pub fn unsupported(driver: &'static str, capability: &'static str) -> Self {
        DriverError::UnsupportedCapability { driver, capability }
    }
}

/// 页面驱动特质
///
/// 浏览器能力接口：所有驱动都能导航并读取源码，
/// 点击、截图、滚动只由支持它们的驱动实现，其余驱动返回 `UnsupportedCapability`。
///
/// 同一个驱动实例同一时间只服务一个调用方。
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// 驱动名称
    fn name(&self) -> &'static str;

    /// 打开URL
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// 当前页面的HTML
    async fn page_source(&self) -> Result<String, DriverError>;

    /// 当前页面的URL（跟随重定向后）
    async fn current_url(&self) -> Result<String, DriverError>;

    /// 点击xpath选中的元素
    async fn click(&self, _xpath: &str) -> Result<(), DriverError> {
        Err(DriverError::unsupported(self.name(), "click"))
    }

    /// 整页截图 (base64 encoded PNG)
    async fn screenshot(&self) -> Result<String, DriverError> {
        Err(DriverError::unsupported(self.name(), "screenshot"))
    }

    /// 滚动到页面底部
    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        Err(DriverError::unsupported(self.name(), "scroll"))
    }

    /// 文档高度（像素）
    async fn document_height(&self) -> Result<u64, DriverError> {
        Err(DriverError::unsupported(self.name(), "document height"))
    }

    /// 结束会话
    async fn quit(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
