// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

/// 目录卡片
///
/// `card_xpath` 与 `url_xpath` 在同一文档上必须选中数量相同的节点，
/// 否则这对选择器无效，在使用前就会被拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// 卡片选择器
    pub card_xpath: String,
    /// 卡片内链接选择器
    pub url_xpath: Option<String>,
    /// 第一张卡片序列化后的HTML
    pub html_snippet: String,
    /// 当前页所有卡片链接（已解析为绝对地址）
    #[serde(default)]
    pub urls_on_page: Vec<String>,
}
