// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::{CatalogItem, Pagination, WebpageFields, WebpageType};
use serde::{Deserialize, Serialize};

/// 抓取得到的一条记录（键按字段声明顺序排列）
pub type Record = serde_json::Map<String, serde_json::Value>;

/// 抓取配置
///
/// 一次发现过程的唯一产物，以JSON持久化；回放时保持不可变，
/// 同一份配置在确定性的页面上总是产生相同的记录序列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub start_url: String,
    pub page_type: WebpageType,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub catalog_item: Option<CatalogItem>,
    #[serde(default)]
    pub open_nested_pages: bool,
    #[serde(default)]
    pub fields: WebpageFields,
    pub max_pages: usize,
    pub max_rows: usize,
}

impl ScraperConfig {
    /// 以起始URL和页面类型创建配置，其余部分在发现过程中逐步填充
    pub fn new(start_url: impl Into<String>, page_type: WebpageType) -> Self {
        Self {
            start_url: start_url.into(),
            page_type,
            pagination: Pagination::None,
            catalog_item: None,
            open_nested_pages: false,
            fields: WebpageFields::default(),
            max_pages: 1,
            max_rows: 100,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DynamicField, ExtractMode, FieldValue, StaticField};

    #[test]
    fn test_json_round_trip_is_lossless() {
        let config = ScraperConfig {
            start_url: "https://shop.example/catalog".to_string(),
            page_type: WebpageType::Catalog,
            pagination: Pagination::Xpath {
                xpath: "//a[@class='next']".to_string(),
            },
            catalog_item: Some(CatalogItem {
                card_xpath: "//div[@class='card']".to_string(),
                url_xpath: Some("//div[@class='card']/a/@href".to_string()),
                html_snippet: "<div class=\"card\"><a href=\"/p/1\">A</a></div>".to_string(),
                urls_on_page: vec!["https://shop.example/p/1".to_string()],
            }),
            open_nested_pages: false,
            fields: WebpageFields {
                static_fields: vec![StaticField {
                    name: "title".to_string(),
                    xpath: "//a".to_string(),
                    extract_mode: ExtractMode::Text,
                    sample_value: Some(FieldValue::Single("A".to_string())),
                    color: Some("red".to_string()),
                }],
                dynamic_fields: vec![DynamicField {
                    section_name: "specs".to_string(),
                    name_xpath: ".//dt".to_string(),
                    value_xpath: ".//dd".to_string(),
                    sample_values: vec![("Color".to_string(), "Red".to_string())],
                    color: None,
                }],
            },
            max_pages: 3,
            max_rows: 10,
        };
        let json = config.to_json().unwrap();
        let back = ScraperConfig::from_json(&json).unwrap();
        assert_eq!(back, config);

        let keys: Vec<String> = serde_json::from_str::<Record>(&json)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(
            keys,
            vec![
                "start_url",
                "page_type",
                "pagination",
                "catalog_item",
                "open_nested_pages",
                "fields",
                "max_pages",
                "max_rows"
            ]
        );
    }
}
