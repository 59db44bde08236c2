// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTML片段
///
/// 分块单元。`xpath` 是该节点在文档中的绝对路径，
/// 尺寸是固定分词器下的词元数，而不是字节数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlPart {
    pub xpath: String,
    pub html_content: String,
    pub text_content: String,
    pub html_size: usize,
    pub text_size: usize,
}

impl fmt::Display for HtmlPart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(xpath='{}' html_size='{}' text_size='{}')",
            self.xpath, self.html_size, self.text_size
        )
    }
}
