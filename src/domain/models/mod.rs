// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了页面结构发现与抓取的核心数据结构：
/// - 页面类型（webpage）：目录页、详情页等分类结果
/// - 分页（pagination）：五种翻页机制的标签联合
/// - 目录卡片（catalog_item）：卡片与链接选择器
/// - 字段（fields）：静态字段与动态（标签/值）字段
/// - HTML片段（html_part）：按词元预算切分的文档单元
/// - 抓取配置（scraper_config）：一次发现过程的可回放产物
pub mod catalog_item;
pub mod fields;
pub mod html_part;
pub mod pagination;
pub mod scraper_config;
pub mod webpage;

pub use catalog_item::CatalogItem;
pub use fields::{
    assign_colors, DynamicField, ExtractMode, FieldValue, PairedValues, StaticField,
    WebpageFields,
};
pub use html_part::HtmlPart;
pub use pagination::Pagination;
pub use scraper_config::{Record, ScraperConfig};
pub use webpage::{ParseWebpageTypeError, WebpageType};
