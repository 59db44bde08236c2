// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 用例模块
///
/// - 结构发现（discover_use_case）：分类、分页、卡片、字段，每一步都可审阅
/// - 抓取（scrape_use_case）：回放配置，惰性产出记录
pub mod discover_use_case;
pub mod scrape_use_case;

pub use discover_use_case::{
    AcceptAll, CatalogSelectors, DiscoverError, DiscoverUseCase, DiscoveryReviewer, Review,
};
pub use scrape_use_case::{PageIterator, ScrapeEngine, ScrapeError};
