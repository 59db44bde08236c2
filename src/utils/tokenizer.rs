// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;

static PIECES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{L}\p{N}_]+|[^\p{L}\p{N}_\s]+").expect("Failed to compile token regex")
});

/// 分词器特质
///
/// 分块和提示词预算都以词元数计量，而不是字节数。
pub trait Tokenizer: Send + Sync {
    /// 统计文本的词元数
    fn count(&self, text: &str) -> usize;

    /// 将文本切分为词元区间（字节偏移），用于按预算切块
    fn spans(&self, text: &str) -> Vec<(usize, usize)>;
}

/// 确定性的词元估算器
///
/// 字母数字串按每4个字符1个词元计数，连续标点按每2个字符1个词元计数
/// （`</`、`="`、`">` 这类标记片段在BPE词表中通常是一个词元），空白不计数。
/// 与cl100k分词结果量级一致，且不依赖外部词表。
#[derive(Debug, Clone, Copy, Default)]
pub struct WordPieceEstimator;

const CHARS_PER_WORD_PIECE: usize = 4;
const CHARS_PER_PUNCT_PIECE: usize = 2;

fn piece_width(piece: &str) -> usize {
    match piece.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => CHARS_PER_WORD_PIECE,
        _ => CHARS_PER_PUNCT_PIECE,
    }
}

impl Tokenizer for WordPieceEstimator {
    fn count(&self, text: &str) -> usize {
        PIECES
            .find_iter(text)
            .map(|m| m.as_str().chars().count().div_ceil(piece_width(m.as_str())))
            .sum()
    }

    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for m in PIECES.find_iter(text) {
            let piece = m.as_str();
            let width = piece_width(piece);
            let mut start = m.start();
            let mut chars_in_span = 0;
            for (offset, _) in piece.char_indices() {
                if chars_in_span == width {
                    spans.push((start, m.start() + offset));
                    start = m.start() + offset;
                    chars_in_span = 0;
                }
                chars_in_span += 1;
            }
            spans.push((start, m.end()));
        }
        spans
    }
}

/// 按词元预算切分文本
///
/// 每块最多 `max_tokens` 个词元，块之间不重叠，拼接后还原原文。
pub fn chunk_text(tokenizer: &dyn Tokenizer, text: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let spans = tokenizer.spans(text);
    if spans.len() <= max_tokens {
        return if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut chunk_start = 0;
    for (i, window) in spans.chunks(max_tokens).enumerate() {
        if i == 0 {
            continue;
        }
        let boundary = window[0].0;
        chunks.push(text[chunk_start..boundary].to_string());
        chunk_start = boundary;
    }
    chunks.push(text[chunk_start..].to_string());
    chunks
}
