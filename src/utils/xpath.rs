// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! XPath 1.0 子集求值器
//!
//! 直接在 `scraper::Html` 的 ego-tree 节点上求值，支持常用轴、节点测试、
//! 谓词以及字符串函数。模型生成的选择器和分块得到的绝对路径都通过这里解析。

use dashmap::DashMap;
use ego_tree::{NodeId, NodeRef};
use once_cell::sync::Lazy;
use scraper::Node;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// XPath错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    /// 语法错误
    #[error("XPath syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    /// 不支持的函数
    #[error("Unsupported XPath function: {0}()")]
    UnknownFunction(String),
    /// 参数数量错误
    #[error("Wrong number of arguments for {0}()")]
    Arity(String),
}

impl XPathError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        XPathError::Syntax {
            position,
            message: message.into(),
        }
    }
}

static COMPILED: Lazy<DashMap<String, Arc<XPath>>> = Lazy::new(DashMap::new);
const COMPILED_CACHE_LIMIT: usize = 2048;

/// 编译XPath表达式（带进程内缓存）
///
/// 抓取时同一组选择器会在每张卡片上重复求值，缓存避免重复解析。
pub fn compile(source: &str) -> Result<Arc<XPath>, XPathError> {
    if let Some(hit) = COMPILED.get(source) {
        return Ok(hit.value().clone());
    }
    let parsed = Arc::new(XPath::parse(source)?);
    if COMPILED.len() >= COMPILED_CACHE_LIMIT {
        COMPILED.clear();
    }
    COMPILED.insert(source.to_string(), parsed.clone());
    Ok(parsed)
}

/// 已解析的XPath表达式
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    /// 解析XPath表达式
    ///
    /// # 参数
    ///
    /// * `source` - XPath源文本
    ///
    /// # 返回值
    ///
    /// * `Ok(XPath)` - 解析成功
    /// * `Err(XPathError)` - 语法错误或使用了不支持的函数
    pub fn parse(source: &str) -> Result<Self, XPathError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(XPathError::syntax(
                *offset,
                format!("unexpected token {:?}", token),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 以给定节点为上下文求值
    pub fn evaluate<'a>(&self, context: NodeRef<'a, Node>) -> XValue<'a> {
        let evaluator = Evaluator::new(context);
        let ctx = Context {
            node: XNode::Node(context),
            position: 1,
            size: 1,
        };
        match evaluator.eval(&self.expr, &ctx) {
            Value::Nodes(nodes) => XValue::Nodes(nodes),
            Value::Str(s) => XValue::String(s),
            Value::Num(n) => XValue::Number(n),
            Value::Bool(b) => XValue::Boolean(b),
        }
    }

    /// 以给定节点为上下文选择节点集；非节点集结果返回空列表
    pub fn select<'a>(&self, context: NodeRef<'a, Node>) -> Vec<XNode<'a>> {
        match self.evaluate(context) {
            XValue::Nodes(nodes) => nodes,
            _ => Vec::new(),
        }
    }
}

impl FromStr for XPath {
    type Err = XPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        XPath::parse(s)
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// 求值结果
#[derive(Debug, Clone)]
pub enum XValue<'a> {
    Nodes(Vec<XNode<'a>>),
    String(String),
    Number(f64),
    Boolean(bool),
}

/// 节点集中的一个条目：树节点或属性
#[derive(Debug, Clone, Copy)]
pub enum XNode<'a> {
    Node(NodeRef<'a, Node>),
    Attribute {
        owner: NodeRef<'a, Node>,
        index: usize,
        name: &'a str,
        value: &'a str,
    },
}

impl<'a> XNode<'a> {
    /// XPath字符串值
    pub fn string_value(&self) -> String {
        match self {
            XNode::Node(node) => node_text(*node),
            XNode::Attribute { value, .. } => value.to_string(),
        }
    }

    /// 树节点（属性节点返回其所属元素）
    pub fn node(&self) -> NodeRef<'a, Node> {
        match self {
            XNode::Node(node) => *node,
            XNode::Attribute { owner, .. } => *owner,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, XNode::Node(node) if node.value().is_element())
    }

    /// 读取元素属性；属性节点和文本节点返回None
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        match self {
            XNode::Node(node) => node.value().as_element().and_then(|el| el.attr(name)),
            XNode::Attribute { .. } => None,
        }
    }
}

/// 节点的文本内容（所有后代文本节点拼接）
pub fn node_text(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(text) => text.to_string(),
        Node::Comment(comment) => comment.to_string(),
        _ => node
            .descendants()
            .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
            .collect(),
    }
}

/// 生成lxml风格的绝对路径
///
/// 只有当父节点下存在多个同名元素时才输出位置下标，例如
/// `/html/body/div[2]/p`。
pub fn absolute_path(node: NodeRef<'_, Node>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(n) = current {
        match n.value() {
            Node::Element(el) => {
                let name = el.name();
                segments.push(indexed_segment(n, name, |sib| {
                    sib.value().as_element().is_some_and(|e| e.name() == name)
                }));
            }
            Node::Text(_) => {
                segments.push(indexed_segment(n, "text()", |sib| sib.value().is_text()));
            }
            _ => {}
        }
        current = n.parent();
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}

fn indexed_segment<F>(node: NodeRef<'_, Node>, label: &str, same_kind: F) -> String
where
    F: Fn(&NodeRef<'_, Node>) -> bool,
{
    let Some(parent) = node.parent() else {
        return label.to_string();
    };
    let mut position = 0;
    let mut total = 0;
    for sibling in parent.children().filter(|s| same_kind(s)) {
        total += 1;
        if sibling.id() == node.id() {
            position = total;
        }
    }
    if total > 1 {
        format!("{}[{}]", label, position)
    } else {
        label.to_string()
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DoubleDot,
    DoubleColon,
    Star,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Name(String),
    Literal(String),
    Number(f64),
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>, XPathError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '@' => {
                i += 1;
                Token::At
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '*' => {
                i += 1;
                Token::Star
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::NotEq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::LtEq
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::GtEq
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            ':' if next == Some(':') => {
                i += 2;
                Token::DoubleColon
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DoubleDot
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                i += 1;
                Token::Dot
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(XPathError::syntax(offset, "unterminated string literal"));
                }
                let literal: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                i = end + 1;
                Token::Literal(literal)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| XPathError::syntax(offset, format!("bad number {}", text)))?;
                Token::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                Token::Name(chars[start..i].iter().map(|(_, c)| *c).collect())
            }
            other => {
                return Err(XPathError::syntax(
                    offset,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        tokens.push((offset, token));
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST + parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "attribute" => Axis::Attribute,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    Text,
    Node,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Last,
    Position,
    Count,
    String,
    Concat,
    Contains,
    StartsWith,
    EndsWith,
    NormalizeSpace,
    StringLength,
    Translate,
    Not,
    True,
    False,
    Boolean,
    Name,
}

impl Function {
    fn resolve(name: &str, arity: usize) -> Result<Self, XPathError> {
        let (function, min, max) = match name {
            "last" => (Function::Last, 0, 0),
            "position" => (Function::Position, 0, 0),
            "count" => (Function::Count, 1, 1),
            "string" => (Function::String, 0, 1),
            "concat" => (Function::Concat, 2, usize::MAX),
            "contains" => (Function::Contains, 2, 2),
            "starts-with" => (Function::StartsWith, 2, 2),
            "ends-with" => (Function::EndsWith, 2, 2),
            "normalize-space" => (Function::NormalizeSpace, 0, 1),
            "string-length" => (Function::StringLength, 0, 1),
            "translate" => (Function::Translate, 3, 3),
            "not" => (Function::Not, 1, 1),
            "true" => (Function::True, 0, 0),
            "false" => (Function::False, 0, 0),
            "boolean" => (Function::Boolean, 1, 1),
            "name" | "local-name" => (Function::Name, 0, 1),
            _ => return Err(XPathError::UnknownFunction(name.to_string())),
        };
        if arity < min || arity > max {
            return Err(XPathError::Arity(name.to_string()));
        }
        Ok(function)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call(Function, Vec<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .or_else(|| self.tokens.last().map(|(o, _)| *o + 1))
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), XPathError> {
        let offset = self.offset();
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(XPathError::syntax(
                offset,
                format!("expected {:?}, found {:?}", expected, t),
            )),
            None => Err(XPathError::syntax(
                offset,
                format!("expected {:?}, found end of input", expected),
            )),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_equality()?;
        while self.peek_keyword("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_union()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::LtEq) => CompareOp::LtEq,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::GtEq) => CompareOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_union()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_path_expr()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.advance();
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path_expr(&mut self) -> Result<Expr, XPathError> {
        match self.peek() {
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::LParen) => {
                self.parse_filter_expr()
            }
            Some(Token::Name(name))
                if matches!(self.peek_at(1), Some(Token::LParen))
                    && !matches!(name.as_str(), "text" | "node") =>
            {
                self.parse_filter_expr()
            }
            Some(_) => self.parse_location_path(),
            None => Err(XPathError::syntax(self.offset(), "unexpected end of input")),
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr, XPathError> {
        let offset = self.offset();
        let base = match self.advance() {
            Some(Token::Literal(s)) => return Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => return Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                inner
            }
            Some(Token::Name(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if !matches!(self.peek(), Some(Token::RParen)) {
                    args.push(self.parse_or()?);
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                let function = Function::resolve(&name, args.len())?;
                return Ok(Expr::Call(function, args));
            }
            _ => return Err(XPathError::syntax(offset, "expected expression")),
        };

        let mut predicates = Vec::new();
        while matches!(self.peek(), Some(Token::LBracket)) {
            predicates.push(self.parse_predicate()?);
        }
        let mut steps = Vec::new();
        self.parse_trailing_steps(&mut steps)?;
        if predicates.is_empty() && steps.is_empty() {
            return Ok(base);
        }
        Ok(Expr::Filter {
            base: Box::new(base),
            predicates,
            steps,
        })
    }

    fn parse_location_path(&mut self) -> Result<Expr, XPathError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                if self.starts_step() {
                    steps.push(self.parse_step()?);
                    self.parse_trailing_steps(&mut steps)?;
                }
                true
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                steps.push(Step::descendant_or_self());
                steps.push(self.parse_step()?);
                self.parse_trailing_steps(&mut steps)?;
                true
            }
            _ => {
                steps.push(self.parse_step()?);
                self.parse_trailing_steps(&mut steps)?;
                false
            }
        };
        Ok(Expr::Path { absolute, steps })
    }

    fn parse_trailing_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), XPathError> {
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(Step::descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(()),
            }
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DoubleDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        let offset = self.offset();
        let axis = match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DoubleDot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::At) => {
                self.advance();
                Axis::Attribute
            }
            Some(Token::Name(name)) if matches!(self.peek_at(1), Some(Token::DoubleColon)) => {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| XPathError::syntax(offset, format!("unknown axis {}", name)))?;
                self.advance();
                self.advance();
                axis
            }
            _ => Axis::Child,
        };

        let offset = self.offset();
        let test = match self.advance() {
            Some(Token::Star) => NodeTest::Any,
            Some(Token::Name(name)) => {
                if matches!(self.peek(), Some(Token::LParen))
                    && matches!(name.as_str(), "text" | "node")
                {
                    self.advance();
                    self.expect(Token::RParen)?;
                    if name == "text" {
                        NodeTest::Text
                    } else {
                        NodeTest::Node
                    }
                } else {
                    NodeTest::Name(name.to_ascii_lowercase())
                }
            }
            other => {
                return Err(XPathError::syntax(
                    offset,
                    format!("expected node test, found {:?}", other),
                ))
            }
        };

        let mut predicates = Vec::new();
        while matches!(self.peek(), Some(Token::LBracket)) {
            predicates.push(self.parse_predicate()?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_predicate(&mut self) -> Result<Expr, XPathError> {
        self.expect(Token::LBracket)?;
        let expr = self.parse_or()?;
        self.expect(Token::RBracket)?;
        Ok(expr)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

enum Value<'a> {
    Nodes(Vec<XNode<'a>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl<'a> Value<'a> {
    fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn to_text(&self) -> String {
        match self {
            Value::Nodes(nodes) => nodes.first().map(|n| n.string_value()).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => parse_number(&other.to_text()),
        }
    }
}

fn parse_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Context<'a> {
    node: XNode<'a>,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    root: NodeRef<'a, Node>,
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    fn new(context: NodeRef<'a, Node>) -> Self {
        let root = context.ancestors().last().unwrap_or(context);
        let order = root
            .descendants()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        Self { root, order }
    }

    fn sort_key(&self, node: &XNode<'a>) -> (usize, usize) {
        match node {
            XNode::Node(n) => (self.order.get(&n.id()).copied().unwrap_or(usize::MAX), 0),
            XNode::Attribute { owner, index, .. } => (
                self.order.get(&owner.id()).copied().unwrap_or(usize::MAX),
                index + 1,
            ),
        }
    }

    fn document_order(&self, mut nodes: Vec<XNode<'a>>) -> Vec<XNode<'a>> {
        nodes.sort_by_key(|n| self.sort_key(n));
        nodes.dedup_by_key(|n| self.sort_key(n));
        nodes
    }

    fn eval(&self, expr: &Expr, ctx: &Context<'a>) -> Value<'a> {
        match expr {
            Expr::Or(l, r) => Value::Bool(self.eval(l, ctx).to_bool() || self.eval(r, ctx).to_bool()),
            Expr::And(l, r) => {
                Value::Bool(self.eval(l, ctx).to_bool() && self.eval(r, ctx).to_bool())
            }
            Expr::Compare(op, l, r) => {
                let left = self.eval(l, ctx);
                let right = self.eval(r, ctx);
                Value::Bool(compare(*op, &left, &right))
            }
            Expr::Union(l, r) => {
                let mut nodes = match self.eval(l, ctx) {
                    Value::Nodes(n) => n,
                    _ => Vec::new(),
                };
                if let Value::Nodes(more) = self.eval(r, ctx) {
                    nodes.extend(more);
                }
                Value::Nodes(self.document_order(nodes))
            }
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    vec![XNode::Node(self.root)]
                } else {
                    vec![ctx.node]
                };
                Value::Nodes(self.apply_steps(start, steps))
            }
            Expr::Filter {
                base,
                predicates,
                steps,
            } => {
                let mut nodes = match self.eval(base, ctx) {
                    Value::Nodes(n) => n,
                    other => return other,
                };
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate);
                }
                Value::Nodes(self.apply_steps(nodes, steps))
            }
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(function, args) => self.call(*function, args, ctx),
        }
    }

    fn apply_steps(&self, start: Vec<XNode<'a>>, steps: &[Step]) -> Vec<XNode<'a>> {
        let mut current = start;
        for step in steps {
            let mut next = Vec::new();
            for node in &current {
                let mut candidates: Vec<XNode<'a>> = self
                    .axis(*node, step.axis)
                    .into_iter()
                    .filter(|c| matches_test(c, &step.test, step.axis))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.filter(candidates, predicate);
                }
                next.extend(candidates);
            }
            current = self.document_order(next);
        }
        current
    }

    fn filter(&self, candidates: Vec<XNode<'a>>, predicate: &Expr) -> Vec<XNode<'a>> {
        let size = candidates.len();
        candidates
            .into_iter()
            .enumerate()
            .filter(|(i, node)| {
                let ctx = Context {
                    node: *node,
                    position: i + 1,
                    size,
                };
                match self.eval(predicate, &ctx) {
                    Value::Num(n) => n == (i + 1) as f64,
                    other => other.to_bool(),
                }
            })
            .map(|(_, node)| node)
            .collect()
    }

    fn axis(&self, node: XNode<'a>, axis: Axis) -> Vec<XNode<'a>> {
        let n = match node {
            XNode::Node(n) => n,
            XNode::Attribute { owner, .. } => {
                return match axis {
                    Axis::SelfAxis | Axis::DescendantOrSelf => vec![node],
                    Axis::Parent => vec![XNode::Node(owner)],
                    Axis::Ancestor => std::iter::once(owner)
                        .chain(owner.ancestors())
                        .map(XNode::Node)
                        .collect(),
                    Axis::AncestorOrSelf => std::iter::once(node)
                        .chain(std::iter::once(owner).chain(owner.ancestors()).map(XNode::Node))
                        .collect(),
                    _ => Vec::new(),
                };
            }
        };
        match axis {
            Axis::Child => n.children().map(XNode::Node).collect(),
            Axis::Descendant => n.descendants().skip(1).map(XNode::Node).collect(),
            Axis::DescendantOrSelf => n.descendants().map(XNode::Node).collect(),
            Axis::SelfAxis => vec![node],
            Axis::Parent => n.parent().map(XNode::Node).into_iter().collect(),
            Axis::Ancestor => n.ancestors().map(XNode::Node).collect(),
            Axis::AncestorOrSelf => std::iter::once(n)
                .chain(n.ancestors())
                .map(XNode::Node)
                .collect(),
            Axis::FollowingSibling => n.next_siblings().map(XNode::Node).collect(),
            Axis::PrecedingSibling => n.prev_siblings().map(XNode::Node).collect(),
            Axis::Attribute => match n.value() {
                Node::Element(el) => el
                    .attrs()
                    .enumerate()
                    .map(|(index, (name, value))| XNode::Attribute {
                        owner: n,
                        index,
                        name,
                        value,
                    })
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    fn call(&self, function: Function, args: &[Expr], ctx: &Context<'a>) -> Value<'a> {
        let arg_text = |i: usize| -> String {
            args.get(i)
                .map(|a| self.eval(a, ctx).to_text())
                .unwrap_or_else(|| ctx.node.string_value())
        };
        match function {
            Function::Last => Value::Num(ctx.size as f64),
            Function::Position => Value::Num(ctx.position as f64),
            Function::Count => match args.first().map(|a| self.eval(a, ctx)) {
                Some(Value::Nodes(nodes)) => Value::Num(nodes.len() as f64),
                _ => Value::Num(0.0),
            },
            Function::String => Value::Str(arg_text(0)),
            Function::Concat => Value::Str(
                args.iter()
                    .map(|a| self.eval(a, ctx).to_text())
                    .collect::<String>(),
            ),
            Function::Contains => Value::Bool(arg_text(0).contains(&arg_text(1))),
            Function::StartsWith => Value::Bool(arg_text(0).starts_with(&arg_text(1))),
            Function::EndsWith => Value::Bool(arg_text(0).ends_with(&arg_text(1))),
            Function::NormalizeSpace => Value::Str(normalize_space(&arg_text(0))),
            Function::StringLength => Value::Num(arg_text(0).chars().count() as f64),
            Function::Translate => {
                let source = arg_text(0);
                let from: Vec<char> = arg_text(1).chars().collect();
                let to: Vec<char> = arg_text(2).chars().collect();
                Value::Str(
                    source
                        .chars()
                        .filter_map(|c| match from.iter().position(|f| *f == c) {
                            Some(i) => to.get(i).copied(),
                            None => Some(c),
                        })
                        .collect(),
                )
            }
            Function::Not => Value::Bool(!args.first().is_some_and(|a| self.eval(a, ctx).to_bool())),
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
            Function::Boolean => Value::Bool(args.first().is_some_and(|a| self.eval(a, ctx).to_bool())),
            Function::Name => {
                let target = match args.first().map(|a| self.eval(a, ctx)) {
                    Some(Value::Nodes(nodes)) => nodes.first().copied(),
                    Some(_) => None,
                    None => Some(ctx.node),
                };
                Value::Str(match target {
                    Some(XNode::Node(n)) => n
                        .value()
                        .as_element()
                        .map(|el| el.name().to_string())
                        .unwrap_or_default(),
                    Some(XNode::Attribute { name, .. }) => name.to_string(),
                    None => String::new(),
                })
            }
        }
    }
}

fn matches_test(node: &XNode<'_>, test: &NodeTest, axis: Axis) -> bool {
    match node {
        XNode::Attribute { name, .. } => match test {
            NodeTest::Name(expected) => name.eq_ignore_ascii_case(expected),
            NodeTest::Any | NodeTest::Node => true,
            NodeTest::Text => false,
        },
        XNode::Node(n) => {
            if axis == Axis::Attribute {
                return false;
            }
            match test {
                NodeTest::Name(expected) => n
                    .value()
                    .as_element()
                    .is_some_and(|el| el.name().eq_ignore_ascii_case(expected)),
                NodeTest::Any => n.value().is_element(),
                NodeTest::Text => n.value().is_text(),
                NodeTest::Node => true,
            }
        }
    }
}

fn compare(op: CompareOp, left: &Value<'_>, right: &Value<'_>) -> bool {
    match (left, right) {
        (Value::Nodes(l), Value::Nodes(r)) => l.iter().any(|a| {
            let a = a.string_value();
            r.iter()
                .any(|b| compare_atoms(op, &Value::Str(a.clone()), &Value::Str(b.string_value())))
        }),
        (Value::Nodes(nodes), Value::Bool(b)) | (Value::Bool(b), Value::Nodes(nodes)) => {
            compare_atoms(op, &Value::Bool(!nodes.is_empty()), &Value::Bool(*b))
        }
        (Value::Nodes(nodes), other) => nodes
            .iter()
            .any(|n| compare_atoms(op, &Value::Str(n.string_value()), other)),
        (other, Value::Nodes(nodes)) => nodes
            .iter()
            .any(|n| compare_atoms(op, other, &Value::Str(n.string_value()))),
        _ => compare_atoms(op, left, right),
    }
}

fn compare_atoms(op: CompareOp, left: &Value<'_>, right: &Value<'_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::NotEq => {
            let equal = match (left, right) {
                (Value::Bool(_), _) | (_, Value::Bool(_)) => left.to_bool() == right.to_bool(),
                (Value::Num(_), _) | (_, Value::Num(_)) => left.to_number() == right.to_number(),
                _ => left.to_text() == right.to_text(),
            };
            if op == CompareOp::Eq {
                equal
            } else {
                !equal
            }
        }
        CompareOp::Lt => left.to_number() < right.to_number(),
        CompareOp::LtEq => left.to_number() <= right.to_number(),
        CompareOp::Gt => left.to_number() > right.to_number(),
        CompareOp::GtEq => left.to_number() >= right.to_number(),
    }
}

#[cfg(test)]
#[path = "xpath_test.rs"]
mod tests;
