// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 结构发现与抓取用例
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含页面结构模型、语言模型边界和检测器
pub mod domain;

/// 引擎模块
///
/// 页面驱动、翻页协议和浏览器会话池
pub mod engines;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

pub use application::use_cases::{
    AcceptAll, DiscoverUseCase, DiscoveryReviewer, Review, ScrapeEngine,
};
pub use config::Settings;
pub use domain::models::{Pagination, Record, ScraperConfig, WebpageType};
pub use domain::services::ParserAi;
