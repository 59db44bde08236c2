// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - LLM服务（llm_service）：语言模型边界和OpenAI兼容客户端
/// - 模型代理（model_agent）：问答-校验-重试循环
/// - 提取服务（extraction_service）：把xpath落到DOM树上取值
/// - 检测器：页面分类、分页、目录卡片、数据字段、片段相关性
/// - 结构发现门面（parser_ai）：组合所有检测器
pub mod catalog_item_detector;
pub mod data_fields_extractor;
pub mod extraction_service;
pub mod llm_service;
pub mod model_agent;
pub mod page_classifier;
pub mod pagination_detector;
pub mod parser_ai;
pub mod parts_descriptor;

#[cfg(test)]
pub(crate) mod test_support;

pub use data_fields_extractor::FieldScope;
pub use extraction_service::{DomExtractor, ExtractionError};
pub use llm_service::{ChatMessage, LanguageModel, LlmError, ModelResponse, OpenAiChatModel};
pub use model_agent::{DiscoveryError, ModelAgent};
pub use parser_ai::ParserAi;
