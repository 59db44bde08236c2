// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 页面类型
///
/// 页面分类器的结果，决定后续的发现与抓取流程。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebpageType {
    /// 目录页，包含一组相似的卡片
    Catalog,
    /// 详情页，只描述一个条目
    #[serde(rename = "detailed_page", alias = "details")]
    Details,
    /// 其他页面
    Other,
    /// 验证码页面（只检测，不绕过）
    Captcha,
}

impl WebpageType {
    pub const ALL: [WebpageType; 4] = [
        WebpageType::Catalog,
        WebpageType::Details,
        WebpageType::Other,
        WebpageType::Captcha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebpageType::Catalog => "catalog",
            WebpageType::Details => "detailed_page",
            WebpageType::Other => "other",
            WebpageType::Captcha => "captcha",
        }
    }

    /// 所有取值的提示词表示，例如 `"catalog", "detailed_page", ...`
    pub fn values_repr() -> String {
        Self::ALL
            .iter()
            .map(|t| format!("\"{}\"", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for WebpageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{value} is not a valid page type. Should be one of {expected}")]
pub struct ParseWebpageTypeError {
    pub value: String,
    pub expected: String,
}

impl FromStr for WebpageType {
    type Err = ParseWebpageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_matches('"').to_ascii_lowercase();
        match normalized.as_str() {
            "catalog" => Ok(WebpageType::Catalog),
            "detailed_page" | "details" => Ok(WebpageType::Details),
            "other" => Ok(WebpageType::Other),
            "captcha" => Ok(WebpageType::Captcha),
            _ => Err(ParseWebpageTypeError {
                value: s.to_string(),
                expected: Self::values_repr(),
            }),
        }
    }
}
