// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// 应用程序配置设置
///
/// 包含语言模型、结构发现、抓取节奏和浏览器后端等所有配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 语言模型配置
    pub llm: LlmSettings,
    /// 结构发现配置
    pub discovery: DiscoverySettings,
    /// 抓取配置
    pub scraping: ScrapingSettings,
    /// 浏览器后端配置
    pub browser: BrowserSettings,
}

/// 语言模型配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// API密钥
    pub api_key: Option<String>,
    /// 文本/JSON模型名称
    pub model: String,
    /// 视觉模型名称（为空时不启用截图分类）
    pub vision_model: Option<String>,
    /// API基础URL
    pub api_base_url: String,
    /// 采样温度
    pub temperature: f32,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 限流/服务端错误时的HTTP重试次数
    pub max_http_retries: u32,
}

/// 结构发现配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySettings {
    /// 校验失败后的最大重问次数
    pub max_retries: u32,
    /// 页面分类的最大重问次数
    pub classifier_retries: u32,
    /// 分页检测每块的词元数
    ///
    /// 以下词元预算都按 `WordPieceEstimator` 计量，默认值按cl100k词表的计数取值；
    /// 换用其他 `Tokenizer` 时需相应调整。
    pub pagination_chunk_tokens: usize,
    /// 卡片检测每块的词元数
    pub catalog_chunk_tokens: usize,
    /// 详情页分块的文本词元预算
    pub parts_text_tokens: usize,
    /// 单个提示词中页面内容的词元上限
    pub page_prompt_tokens: usize,
}

/// 抓取配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingSettings {
    /// 点击翻页后的等待（毫秒）
    pub settle_delay_ms: u64,
    /// 滚动后的等待（毫秒）
    pub scroll_delay_ms: u64,
    /// 页面高度未变化时重试前的等待（毫秒）
    pub scroll_retry_delay_ms: u64,
    /// 导航后的等待（毫秒）
    pub navigation_delay_ms: u64,
    /// 默认最大页数
    pub default_max_pages: usize,
    /// 默认最大行数
    pub default_max_rows: usize,
}

impl ScrapingSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub fn scroll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_retry_delay_ms)
    }

    pub fn navigation_delay(&self) -> Duration {
        Duration::from_millis(self.navigation_delay_ms)
    }
}

/// 浏览器后端配置设置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrowserSettings {
    /// 远程浏览器后端列表（按顺序选择）
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

/// 单个远程浏览器后端
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BackendSettings {
    /// 后端标识
    pub id: String,
    /// DevTools 端点，例如 `http://127.0.0.1:9222`
    pub endpoint: String,
    /// 最大并发会话数
    pub max_sessions: usize,
    /// 创建会话的超时时间（秒）
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_timeout() -> u64 {
    30
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}` 和
    /// `PAGESHAPE__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("PAGESHAPE").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// 从TOML文本加载配置（内置默认值之上）
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            // LLM settings
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.api_base_url", "https://api.openai.com/v1")?
            .set_default("llm.temperature", 0.0)?
            .set_default("llm.timeout_secs", 120)?
            .set_default("llm.max_http_retries", 3)?
            // Discovery settings
            .set_default("discovery.max_retries", 3)?
            .set_default("discovery.classifier_retries", 2)?
            .set_default("discovery.pagination_chunk_tokens", 24000)?
            .set_default("discovery.catalog_chunk_tokens", 32000)?
            .set_default("discovery.parts_text_tokens", 4000)?
            .set_default("discovery.page_prompt_tokens", 32000)?
            // Scraping settings
            .set_default("scraping.settle_delay_ms", 3000)?
            .set_default("scraping.scroll_delay_ms", 2000)?
            .set_default("scraping.scroll_retry_delay_ms", 5000)?
            .set_default("scraping.navigation_delay_ms", 1000)?
            .set_default("scraping.default_max_pages", 10)?
            .set_default("scraping.default_max_rows", 1000)?
            // Browser settings
            .set_default("browser.backends", Vec::<String>::new())
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
