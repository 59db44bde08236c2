// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 分页方式
///
/// 标签联合：只有当前变体的字段会被序列化。
/// 翻页协议在 `engines::page_switcher` 中对其做穷尽匹配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    /// 点击"下一页/加载更多"控件
    Xpath { xpath: String },
    /// 无限滚动
    Scroll,
    /// 递增URL查询参数
    UrlParam {
        param_name: String,
        first_value: i64,
    },
    /// 预先给定的URL列表
    Urls { urls: Vec<String> },
    /// 没有分页
    #[default]
    None,
}

impl fmt::Display for Pagination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pagination::Xpath { xpath } => write!(f, "Pagination using button with xpath: {}", xpath),
            Pagination::Scroll => write!(f, "Pagination using infinite scroll"),
            Pagination::UrlParam { param_name, .. } => {
                write!(f, "Pagination using url parameter '{}'", param_name)
            }
            Pagination::Urls { urls } => {
                write!(f, "Pagination with list of urls (total of {})", urls.len())
            }
            Pagination::None => write!(f, "No pagination"),
        }
    }
}
