// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::{ExtractMode, FieldValue, PairedValues, Record, WebpageFields};
use crate::utils::xpath::{self, XNode, XPathError, XValue};
use ego_tree::{NodeId, NodeRef, Tree};
use scraper::{ElementRef, Html, Node};
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

/// 提取错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// 选择器无法解析
    #[error(transparent)]
    XPath(#[from] XPathError),
    /// 成对选择器的结果数量不一致
    #[error("Labels and values are of different size: {names} != {values}")]
    SelectorMismatch { names: usize, values: usize },
}

/// DOM提取器
///
/// 把xpath（静态字段或成对的动态字段）落到具体的DOM树上取值。
/// 发现阶段用它验证模型给出的选择器，抓取阶段用它采集数据。
pub struct DomExtractor;

impl DomExtractor {
    /// 按xpath提取
    ///
    /// # 参数
    ///
    /// * `context` - 上下文节点（文档根或卡片子树根）
    /// * `xpath` - 选择器
    /// * `mode` - 文本或属性取值
    ///
    /// # 返回值
    ///
    /// * `Ok(None)` - 没有匹配
    /// * `Ok(Some(FieldValue::Single))` - 恰好一个匹配
    /// * `Ok(Some(FieldValue::Many))` - 多个匹配，保持文档顺序
    pub fn extract_by_xpath(
        context: NodeRef<'_, Node>,
        xpath: &str,
        mode: ExtractMode,
    ) -> Result<Option<FieldValue>, ExtractionError> {
        let compiled = xpath::compile(xpath)?;
        let mut values = match compiled.evaluate(context) {
            XValue::Nodes(nodes) => nodes
                .iter()
                .filter_map(|node| node_value(node, mode))
                .collect::<Vec<_>>(),
            XValue::String(s) => vec![s.trim().to_string()],
            XValue::Number(n) => vec![n.to_string()],
            XValue::Boolean(b) => vec![b.to_string()],
        };
        Ok(match values.len() {
            0 => None,
            1 => values.pop().map(FieldValue::Single),
            _ => Some(FieldValue::Many(values)),
        })
    }

    /// 按成对的标签/值选择器提取
    ///
    /// 两个选择器的结果数量不同时返回 `SelectorMismatch`，不做截断。
    pub fn extract_paired(
        context: NodeRef<'_, Node>,
        name_xpath: &str,
        value_xpath: &str,
    ) -> Result<PairedValues, ExtractionError> {
        let names = xpath::compile(name_xpath)?.select(context);
        let values = xpath::compile(value_xpath)?.select(context);
        if names.len() != values.len() {
            return Err(ExtractionError::SelectorMismatch {
                names: names.len(),
                values: values.len(),
            });
        }
        Ok(names
            .iter()
            .zip(values.iter())
            .map(|(name, value)| (node_text(name), node_text(value)))
            .collect())
    }

    /// 按字段集合提取一条记录
    ///
    /// `relative` 为真时，以 `/` 开头的选择器被重新解释为相对上下文节点。
    pub fn extract_fields(
        context: NodeRef<'_, Node>,
        fields: &WebpageFields,
        relative: bool,
    ) -> Result<Record, ExtractionError> {
        Self::extract_fields_into(context, fields, relative, Record::new())
    }

    /// 把字段追加到已有记录之后
    ///
    /// 已存在的键不会被覆盖：冲突的静态字段名以 `field.` 限定，
    /// 冲突的动态标签以所在分区名限定，仍冲突时追加序号。
    pub fn extract_fields_into(
        context: NodeRef<'_, Node>,
        fields: &WebpageFields,
        relative: bool,
        mut record: Record,
    ) -> Result<Record, ExtractionError> {
        let prepare = |xpath: &str| -> String {
            if relative {
                relativize(xpath).into_owned()
            } else {
                xpath.to_string()
            }
        };

        for field in &fields.static_fields {
            let value = Self::extract_by_xpath(context, &prepare(&field.xpath), field.extract_mode)?;
            insert_unique(&mut record, "field", &field.name, field_value_to_json(value));
        }
        for field in &fields.dynamic_fields {
            let pairs = Self::extract_paired(
                context,
                &prepare(&field.name_xpath),
                &prepare(&field.value_xpath),
            )?;
            for (name, value) in pairs {
                insert_unique(&mut record, &field.section_name, &name, Value::String(value));
            }
        }
        Ok(record)
    }

    /// 对整页提取一条记录（详情页模式）
    pub fn extract_page(html: &str, fields: &WebpageFields) -> Result<Record, ExtractionError> {
        Self::extract_page_into(html, fields, Record::new())
    }

    /// 对整页提取，字段追加在 `record` 已有的键之后
    pub fn extract_page_into(
        html: &str,
        fields: &WebpageFields,
        record: Record,
    ) -> Result<Record, ExtractionError> {
        let document = Html::parse_document(html);
        Self::extract_fields_into(document.tree.root(), fields, false, record)
    }

    /// 对页面上每张卡片提取一条记录（目录页模式）
    ///
    /// 每张卡片被复制到独立的子树中，字段选择器相对该子树求值。
    pub fn extract_items(
        html: &str,
        card_xpath: &str,
        fields: &WebpageFields,
    ) -> Result<Vec<Record>, ExtractionError> {
        let document = Html::parse_document(html);
        let cards = xpath::compile(card_xpath)?.select(document.tree.root());
        let mut records = Vec::with_capacity(cards.len());
        for card in cards {
            let subtree = detach_subtree(card.node());
            records.push(Self::extract_fields(subtree.root(), fields, true)?);
        }
        Ok(records)
    }

    /// 在整页上按xpath提取
    pub fn extract_by_xpath_in(
        html: &str,
        xpath: &str,
        mode: ExtractMode,
    ) -> Result<Option<FieldValue>, ExtractionError> {
        let document = Html::parse_document(html);
        Self::extract_by_xpath(document.tree.root(), xpath, mode)
    }

    /// 统计匹配数量
    pub fn count_matches(html: &str, xpath: &str) -> Result<usize, ExtractionError> {
        let document = Html::parse_document(html);
        Ok(xpath::compile(xpath)?.select(document.tree.root()).len())
    }

    /// 链接选择器的取值：元素取 `href`，属性节点取其值
    pub fn link_values(html: &str, xpath: &str) -> Result<Vec<String>, ExtractionError> {
        let document = Html::parse_document(html);
        Ok(xpath::compile(xpath)?
            .select(document.tree.root())
            .iter()
            .filter_map(|node| node_value(node, ExtractMode::Href))
            .filter(|href| !href.is_empty())
            .collect())
    }

    /// 第一个匹配元素的外层HTML
    pub fn first_outer_html(html: &str, xpath: &str) -> Result<Option<String>, ExtractionError> {
        let document = Html::parse_document(html);
        Ok(xpath::compile(xpath)?
            .select(document.tree.root())
            .iter()
            .find_map(|node| ElementRef::wrap(node.node()).map(|el| el.html())))
    }
}

/// 把以 `/` 开头的选择器改写为相对上下文节点的形式
pub fn relativize(xpath: &str) -> Cow<'_, str> {
    let trimmed = xpath.trim();
    if trimmed.starts_with('/') {
        Cow::Owned(format!(".{}", trimmed))
    } else if let Some(rest) = trimmed.strip_prefix("(/") {
        Cow::Owned(format!("(./{}", rest))
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// 页面上第一张卡片的独立子树
///
/// 与 `extract_items` 为每张卡片构造的求值根相同，发现阶段在它上面校验字段。
pub fn first_card(html: &str, card_xpath: &str) -> Result<Option<Tree<Node>>, ExtractionError> {
    let document = Html::parse_document(html);
    Ok(xpath::compile(card_xpath)?
        .select(document.tree.root())
        .first()
        .map(|card| detach_subtree(card.node())))
}

/// 把节点及其后代复制到一棵以片段节点为根的新树中
pub fn detach_subtree(node: NodeRef<'_, Node>) -> Tree<Node> {
    let mut tree = Tree::new(Node::Fragment);
    let root = tree.root().id();
    copy_into(&mut tree, root, node);
    tree
}

fn copy_into(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) {
    let Some(mut parent_node) = tree.get_mut(parent) else {
        return;
    };
    let id = parent_node.append(source.value().clone()).id();
    for child in source.children() {
        copy_into(tree, id, child);
    }
}

fn insert_unique(record: &mut Record, qualifier: &str, key: &str, value: Value) {
    if !record.contains_key(key) {
        record.insert(key.to_string(), value);
        return;
    }
    let qualified = format!("{}.{}", qualifier, key);
    let mut candidate = qualified.clone();
    let mut n = 2;
    while record.contains_key(&candidate) {
        candidate = format!("{} ({})", qualified, n);
        n += 1;
    }
    record.insert(candidate, value);
}

fn node_text(node: &XNode<'_>) -> String {
    node.string_value().trim().to_string()
}

fn node_value(node: &XNode<'_>, mode: ExtractMode) -> Option<String> {
    match (mode.attribute(), node) {
        (Some(attr), XNode::Node(n)) if n.value().is_element() => {
            node.attr(attr).map(|v| v.trim().to_string())
        }
        _ => Some(node_text(node)),
    }
}

fn field_value_to_json(value: Option<FieldValue>) -> Value {
    match value {
        None => Value::Null,
        Some(FieldValue::Single(s)) => Value::String(s),
        Some(FieldValue::Many(values)) => {
            Value::Array(values.into_iter().map(Value::String).collect())
        }
    }
}

#[cfg(test)]
#[path = "extraction_service_test.rs"]
mod tests;
