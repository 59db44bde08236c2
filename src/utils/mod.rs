// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
/// 包括XPath求值、HTML精简、词元计数、URL处理和遥测
pub mod html_compactor;
pub mod retry_policy;
pub mod telemetry;
pub mod tokenizer;
pub mod url_utils;
pub mod xpath;
