// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tracing::warn;

use crate::config::settings::{DiscoverySettings, Settings};
use crate::domain::models::{CatalogItem, Pagination, WebpageFields, WebpageType};
use crate::domain::services::catalog_item_detector::CatalogItemDetector;
use crate::domain::services::data_fields_extractor::{DataFieldsExtractor, FieldScope};
use crate::domain::services::llm_service::{LanguageModel, LlmError, OpenAiChatModel};
use crate::domain::services::model_agent::{DiscoveryError, ModelAgent};
use crate::domain::services::page_classifier::PageTypeClassifier;
use crate::domain::services::pagination_detector::PaginationDetector;
use crate::domain::services::parts_descriptor::{PartsRelevanceDescriptor, ScreenshotDescriber};
use crate::utils::html_compactor::HtmlCompactor;

/// 结构发现门面
///
/// 持有一个文本/JSON模型和一个可选的视觉模型，对外暴露所有检测器。
pub struct ParserAi {
    classifier: PageTypeClassifier,
    pagination: PaginationDetector,
    catalog: CatalogItemDetector,
    fields: DataFieldsExtractor,
    parts: PartsRelevanceDescriptor,
    screenshots: Option<ScreenshotDescriber>,
}

impl ParserAi {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        vision: Option<Arc<dyn LanguageModel>>,
        settings: &DiscoverySettings,
    ) -> Self {
        let compactor = HtmlCompactor::default();
        let agent = ModelAgent::new(model);
        let vision = vision.map(ModelAgent::new);
        Self {
            classifier: PageTypeClassifier::new(
                agent.clone(),
                vision.clone(),
                compactor.clone(),
                settings.classifier_retries,
                settings.page_prompt_tokens,
            ),
            pagination: PaginationDetector::new(
                agent.clone(),
                compactor.clone(),
                settings.pagination_chunk_tokens,
                settings.max_retries,
            ),
            catalog: CatalogItemDetector::new(
                agent.clone(),
                compactor.clone(),
                settings.catalog_chunk_tokens,
                settings.max_retries,
            ),
            fields: DataFieldsExtractor::new(
                agent.clone(),
                compactor.clone(),
                settings.page_prompt_tokens,
                settings.max_retries,
            ),
            parts: PartsRelevanceDescriptor::new(
                agent,
                compactor,
                settings.parts_text_tokens,
                settings.page_prompt_tokens,
                settings.max_retries,
            ),
            screenshots: vision.map(|v| ScreenshotDescriber::new(v, settings.max_retries)),
        }
    }

    /// 按配置创建OpenAI兼容的模型客户端
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatModel::new(&settings.llm)?);
        let vision = OpenAiChatModel::vision(&settings.llm)?
            .map(|m| Arc::new(m) as Arc<dyn LanguageModel>);
        Ok(Self::new(model, vision, &settings.discovery))
    }

    pub fn has_vision(&self) -> bool {
        self.classifier.has_vision()
    }

    /// 页面分类：有视觉模型和截图时用视觉模式，否则用文本模式
    pub async fn classify_page(
        &self,
        html: &str,
        screenshot_base64: Option<&str>,
    ) -> Result<WebpageType, DiscoveryError> {
        match screenshot_base64 {
            Some(screenshot) if self.has_vision() => {
                self.classifier.classify_screenshot(screenshot).await
            }
            _ => self.classifier.classify_html(html).await,
        }
    }

    pub async fn detect_pagination(&self, html: &str) -> Pagination {
        self.pagination.detect(html).await
    }

    pub async fn detect_catalog_item(
        &self,
        html: &str,
        base_url: &str,
        extra_prompt: Option<&str>,
    ) -> Result<CatalogItem, DiscoveryError> {
        self.catalog.detect(html, base_url, extra_prompt).await
    }

    pub fn manually_change_catalog_item(
        &self,
        html: &str,
        card_xpath: &str,
        url_xpath: Option<&str>,
        base_url: &str,
    ) -> Result<CatalogItem, DiscoveryError> {
        self.catalog
            .manually_change(html, card_xpath, url_xpath, base_url)
    }

    pub async fn extract_fields(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        extra_prompt: Option<&str>,
    ) -> Result<WebpageFields, DiscoveryError> {
        self.fields.extract_fields(html, scope, extra_prompt).await
    }

    pub async fn find_fields(
        &self,
        html: &str,
        scope: FieldScope<'_>,
        description: &str,
    ) -> Result<WebpageFields, DiscoveryError> {
        self.fields.find_fields(html, scope, description).await
    }

    /// 精简详情页；有视觉模型和截图时先描述截图作为上下文
    pub async fn summarize_page(
        &self,
        html: &str,
        screenshot_base64: Option<&str>,
    ) -> Result<String, DiscoveryError> {
        let description = match (&self.screenshots, screenshot_base64) {
            (Some(describer), Some(screenshot)) => match describer.describe(screenshot).await {
                Ok(description) => Some(description),
                Err(e) => {
                    warn!("Screenshot description failed, continuing without it: {}", e);
                    None
                }
            },
            _ => None,
        };
        self.parts.summarize(html, description.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::llm_service::ModelResponse;
    use crate::domain::services::test_support::ScriptedModel;
    use serde_json::json;

    fn settings() -> DiscoverySettings {
        Settings::from_toml_str("").unwrap().discovery
    }

    #[tokio::test]
    async fn test_text_classification_without_vision() {
        let model = Arc::new(ScriptedModel::new(vec![ModelResponse::Text("catalog".to_string())]));
        let parser = ParserAi::new(model.clone(), None, &settings());
        assert!(!parser.has_vision());
        let page_type = parser
            .classify_page("<html><body>x</body></html>", Some("aW1n"))
            .await
            .unwrap();
        assert_eq!(page_type, WebpageType::Catalog);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_vision_model_is_used_when_screenshot_given() {
        let text = Arc::new(ScriptedModel::new(vec![]));
        let vision = Arc::new(ScriptedModel::new(vec![ModelResponse::Text("other".to_string())]));
        let parser = ParserAi::new(text, Some(vision.clone() as Arc<dyn LanguageModel>), &settings());
        let page_type = parser.classify_page("<html></html>", Some("aW1n")).await.unwrap();
        assert_eq!(page_type, WebpageType::Other);
        assert_eq!(vision.calls(), 1);
    }

    #[tokio::test]
    async fn test_pagination_goes_through_facade() {
        let model = Arc::new(ScriptedModel::json(vec![json!({"classname": "next"})]));
        let parser = ParserAi::new(model, None, &settings());
        let pagination = parser
            .detect_pagination(r#"<html><body><a class="next">Next</a></body></html>"#)
            .await;
        assert_eq!(
            pagination,
            Pagination::Xpath {
                xpath: "//*[@class='next']".to_string()
            }
        );
    }
}
