// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

/// 有序的标签/值对，顺序与文档顺序一致
pub type PairedValues = Vec<(String, String)>;

/// 静态字段取值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// 节点文本
    #[default]
    Text,
    /// `href` 属性
    Href,
    /// `src` 属性
    Src,
}

impl ExtractMode {
    /// 需要读取的属性名；文本模式返回None
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            ExtractMode::Text => None,
            ExtractMode::Href => Some("href"),
            ExtractMode::Src => Some("src"),
        }
    }
}

/// 字段取值：单个值或按文档顺序排列的多个值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    pub fn is_many(&self) -> bool {
        matches!(self, FieldValue::Many(_))
    }
}

/// 静态字段（无标签的值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticField {
    pub name: String,
    pub xpath: String,
    #[serde(default)]
    pub extract_mode: ExtractMode,
    #[serde(default)]
    pub sample_value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// 动态字段（标签+值成对出现的区块，例如参数表）
///
/// `name_xpath` 与 `value_xpath` 必须解析出等长的序列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicField {
    pub section_name: String,
    pub name_xpath: String,
    pub value_xpath: String,
    #[serde(default)]
    pub sample_values: PairedValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// 页面字段集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WebpageFields {
    #[serde(default)]
    pub static_fields: Vec<StaticField>,
    #[serde(default)]
    pub dynamic_fields: Vec<DynamicField>,
}

impl WebpageFields {
    pub fn is_empty(&self) -> bool {
        self.static_fields.is_empty() && self.dynamic_fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.static_fields.len() + self.dynamic_fields.len()
    }
}

/// 为字段分配高亮颜色
///
/// 先静态字段后动态字段，颜色按 `counter` 循环取自 `palette`；
/// 返回推进后的计数器，调用方可以在多次调用之间延续配色。
pub fn assign_colors(mut fields: WebpageFields, palette: &[&str], counter: usize) -> (WebpageFields, usize) {
    if palette.is_empty() {
        return (fields, counter);
    }
    let mut index = counter;
    for field in fields.static_fields.iter_mut() {
        field.color = Some(palette[index % palette.len()].to_string());
        index += 1;
    }
    for field in fields.dynamic_fields.iter_mut() {
        field.color = Some(palette[index % palette.len()].to_string());
        index += 1;
    }
    (fields, index)
}
