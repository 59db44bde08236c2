// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::HtmlPart;
use crate::utils::tokenizer::{self, Tokenizer, WordPieceEstimator};
use crate::utils::xpath::{self, absolute_path, XPathError};
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// 默认保留的属性
pub const DEFAULT_KEEP_ATTRS: &[&str] = &["class", "id", "name", "href", "text", "src"];
/// 默认删除的噪声标签
pub const DEFAULT_DROP_TAGS: &[&str] = &[
    "script", "style", "meta", "noscript", "header", "footer", "link", "svg", "iframe",
];
/// 超过该字符数的段落文本会被占位符替换
pub const SUBSTITUTION_THRESHOLD: usize = 100;
/// 不超过该词元数的节点视为噪声
const NOISE_TOKENS: usize = 3;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];
const RAW_TEXT_TAGS: &[&str] = &["script", "style", "xmp", "noembed", "noframes", "plaintext"];
const PREFORMATTED_TAGS: &[&str] = &["pre", "textarea"];
const SUBSTITUTED_TAGS: &[&str] = &["p", "cite"];

/// 压缩选项
#[derive(Debug, Clone)]
pub struct MinifyOptions {
    /// 属性白名单
    pub keep_attrs: Vec<String>,
    /// 标签黑名单
    pub drop_tags: Vec<String>,
    /// 是否用占位符替换长文本
    pub use_substitutions: bool,
    /// 是否删除没有文本的元素
    pub remove_empty_tags: bool,
    /// 长文本阈值（字符数）
    pub substitution_threshold: usize,
}

impl Default for MinifyOptions {
    fn default() -> Self {
        Self {
            keep_attrs: DEFAULT_KEEP_ATTRS.iter().map(|s| s.to_string()).collect(),
            drop_tags: DEFAULT_DROP_TAGS.iter().map(|s| s.to_string()).collect(),
            use_substitutions: true,
            remove_empty_tags: false,
            substitution_threshold: SUBSTITUTION_THRESHOLD,
        }
    }
}

impl MinifyOptions {
    /// 只保留给定属性（其余选项取默认值）
    pub fn keep_only(attrs: &[&str]) -> Self {
        Self {
            keep_attrs: attrs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn without_substitutions(mut self) -> Self {
        self.use_substitutions = false;
        self
    }
}

/// 压缩结果
#[derive(Debug, Clone, Default)]
pub struct MinifiedHtml {
    pub html: String,
    /// 占位符 -> 原文
    pub substitutions: BTreeMap<String, String>,
}

/// 分块预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitBudget {
    /// 以节点文本的词元数计量
    Text(usize),
    /// 以节点HTML的词元数计量
    Html(usize),
}

/// HTML压缩与分块
///
/// 删除噪声标签和属性、压缩空白、可选地替换长文本，
/// 并把文档切分为按词元预算限定、以绝对xpath寻址的片段。
#[derive(Clone)]
pub struct HtmlCompactor {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for HtmlCompactor {
    fn default() -> Self {
        Self::new(Arc::new(WordPieceEstimator))
    }
}

impl HtmlCompactor {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// 按词元预算切分纯文本（用于提示词负载）
    pub fn chunk_text(&self, text: &str, max_tokens: usize) -> Vec<String> {
        tokenizer::chunk_text(self.tokenizer.as_ref(), text, max_tokens)
    }

    /// 压缩HTML
    ///
    /// # 参数
    ///
    /// * `html` - 原始HTML
    /// * `options` - 压缩选项
    ///
    /// # 返回值
    ///
    /// 压缩后的HTML以及占位符映射（未启用替换时为空）
    pub fn minify(&self, html: &str, options: &MinifyOptions) -> MinifiedHtml {
        let document = Html::parse_document(html);
        self.minify_node(document.tree.root(), options)
    }

    /// 压缩一个节点及其后代
    ///
    /// 用于已从页面中分离出来的子树（例如目录卡片），不经过重新解析，
    /// 因此表格行等依赖上下文的标签得以保留。
    pub fn minify_node(&self, node: NodeRef<'_, Node>, options: &MinifyOptions) -> MinifiedHtml {
        let skip = HashSet::new();
        let mut substitutions = BTreeMap::new();
        let mut writer = Writer {
            keep_attrs: Some(options.keep_attrs.as_slice()),
            drop_tags: &options.drop_tags,
            skip: &skip,
            collapse_whitespace: true,
            remove_empty_tags: options.remove_empty_tags,
            substitution: options
                .use_substitutions
                .then_some(options.substitution_threshold),
            substitutions: &mut substitutions,
        };
        let mut out = String::new();
        writer.write(node, &mut out, false, false);
        tracing::debug!(
            "Minified HTML to {} bytes ({} substitutions)",
            out.len(),
            substitutions.len()
        );
        MinifiedHtml {
            html: out,
            substitutions,
        }
    }

    /// 将文档切分为片段
    ///
    /// 从根元素递归下降：尺寸不超过预算的节点成为一个片段，否则继续拆分其子元素；
    /// 尺寸不超过3个词元的节点被丢弃。没有子元素却仍超出预算的节点原样输出。
    pub fn split(&self, html: &str, budget: SplitBudget) -> Vec<HtmlPart> {
        let document = Html::parse_document(html);
        let mut parts = Vec::new();
        self.traverse(*document.root_element(), budget, &mut parts);
        tracing::debug!("Split HTML into {} parts", parts.len());
        parts
    }

    fn traverse(&self, node: NodeRef<'_, Node>, budget: SplitBudget, parts: &mut Vec<HtmlPart>) {
        let Some(element) = ElementRef::wrap(node) else {
            return;
        };
        let html_content = element.html();
        let text_content = pretty_text(node);
        let html_size = self.tokenizer.count(&html_content);
        let text_size = self.tokenizer.count(&text_content);
        let (size, limit) = match budget {
            SplitBudget::Text(limit) => (text_size, limit),
            SplitBudget::Html(limit) => (html_size, limit),
        };

        if size <= NOISE_TOKENS {
            return;
        }
        let has_element_children = node.children().any(|c| c.value().is_element());
        if size <= limit || !has_element_children {
            parts.push(HtmlPart {
                xpath: absolute_path(node),
                html_content,
                text_content,
                html_size,
                text_size,
            });
            return;
        }
        for child in node.children() {
            self.traverse(child, budget, parts);
        }
    }

    /// 删除xpath选中的节点，返回新的HTML
    pub fn remove_nodes_by_xpath<S: AsRef<str>>(
        &self,
        html: &str,
        xpaths: &[S],
    ) -> Result<String, XPathError> {
        let document = Html::parse_document(html);
        let mut skip = HashSet::new();
        for source in xpaths {
            let compiled = xpath::compile(source.as_ref())?;
            for node in compiled.select(document.tree.root()) {
                if let xpath::XNode::Node(n) = node {
                    skip.insert(n.id());
                }
            }
        }
        let mut unused = BTreeMap::new();
        let mut writer = Writer {
            keep_attrs: None,
            drop_tags: &[],
            skip: &skip,
            collapse_whitespace: false,
            remove_empty_tags: false,
            substitution: None,
            substitutions: &mut unused,
        };
        let mut out = String::with_capacity(html.len());
        writer.write(document.tree.root(), &mut out, false, false);
        tracing::debug!("Removed {} nodes by xpath", skip.len());
        Ok(out)
    }
}

/// 把占位符还原为原文
pub fn restore_substitutions(html: &str, substitutions: &BTreeMap<String, String>) -> String {
    let mut restored = html.to_string();
    for (placeholder, original) in substitutions {
        let escaped = html_escape::encode_text(original);
        restored = restored.replace(
            &format!(">{}<", placeholder),
            &format!(">{}<", escaped),
        );
    }
    restored
}

/// 节点的可读文本：各文本节点去除首尾空白后按行拼接
pub fn pretty_text(node: NodeRef<'_, Node>) -> String {
    node.descendants()
        .filter_map(|n| n.value().as_text())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !previous_space {
                out.push(' ');
            }
            previous_space = true;
        } else {
            out.push(c);
            previous_space = false;
        }
    }
    out
}

struct Writer<'o> {
    keep_attrs: Option<&'o [String]>,
    drop_tags: &'o [String],
    skip: &'o HashSet<NodeId>,
    collapse_whitespace: bool,
    remove_empty_tags: bool,
    substitution: Option<usize>,
    substitutions: &'o mut BTreeMap<String, String>,
}

impl Writer<'_> {
    fn write(&mut self, node: NodeRef<'_, Node>, out: &mut String, raw: bool, preformatted: bool) {
        if self.skip.contains(&node.id()) {
            return;
        }
        match node.value() {
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.write(child, out, raw, preformatted);
                }
            }
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                out.push('>');
            }
            Node::Text(text) => {
                if raw {
                    out.push_str(text);
                } else if preformatted || !self.collapse_whitespace {
                    out.push_str(&html_escape::encode_text(&**text));
                } else {
                    let collapsed = collapse_whitespace(text);
                    if !collapsed.trim().is_empty() {
                        out.push_str(&html_escape::encode_text(&collapsed));
                    }
                }
            }
            Node::Element(element) => {
                let name = element.name();
                if self.drop_tags.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                    return;
                }
                if self.remove_empty_tags && xpath::node_text(node).trim().is_empty() {
                    return;
                }
                out.push('<');
                out.push_str(name);
                for (attr, value) in element.attrs() {
                    let keep = self
                        .keep_attrs
                        .map_or(true, |allowed| allowed.iter().any(|a| a.eq_ignore_ascii_case(attr)));
                    if keep {
                        out.push(' ');
                        out.push_str(attr);
                        out.push_str("=\"");
                        out.push_str(&html_escape::encode_double_quoted_attribute(value));
                        out.push('"');
                    }
                }
                out.push('>');
                if VOID_TAGS.contains(&name) {
                    return;
                }
                if let Some(placeholder) = self.substitute(node, name) {
                    out.push_str(&placeholder);
                } else {
                    let raw = RAW_TEXT_TAGS.contains(&name);
                    let preformatted = preformatted || PREFORMATTED_TAGS.contains(&name);
                    for child in node.children() {
                        self.write(child, out, raw, preformatted);
                    }
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            _ => {}
        }
    }

    fn substitute(&mut self, node: NodeRef<'_, Node>, name: &str) -> Option<String> {
        let threshold = self.substitution?;
        if !SUBSTITUTED_TAGS.contains(&name) {
            return None;
        }
        let mut children = node.children();
        let only = children.next()?;
        if children.next().is_some() {
            return None;
        }
        let text = only.value().as_text()?;
        let text = if self.collapse_whitespace {
            collapse_whitespace(text).trim().to_string()
        } else {
            text.to_string()
        };
        if text.chars().count() <= threshold {
            return None;
        }
        let placeholder = format!("my_text_{}", self.substitutions.len());
        self.substitutions.insert(placeholder.clone(), text);
        Some(placeholder)
    }
}

#[cfg(test)]
#[path = "html_compactor_test.rs"]
mod tests;
