// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{MockSite, ScriptedModel, START};
use pageshape::application::use_cases::{AcceptAll, DiscoverUseCase, ScrapeEngine};
use pageshape::config::Settings;
use pageshape::domain::models::{FieldValue, Pagination, WebpageType};
use pageshape::domain::services::llm_service::{LanguageModel, ModelResponse};
use pageshape::domain::services::ParserAi;
use serde_json::json;
use std::sync::Arc;

const NO_DELAYS: &str = r#"
[scraping]
navigation_delay_ms = 0
settle_delay_ms = 0
scroll_delay_ms = 0
scroll_retry_delay_ms = 0
"#;

#[tokio::test]
async fn test_discovered_config_scrapes_every_card() {
    let settings = Settings::from_toml_str(NO_DELAYS).unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        ModelResponse::Text("catalog".to_string()),
        ModelResponse::Json(json!({"classname": "next"})),
        ModelResponse::Json(json!({
            "card_xpath": "//div[@class='card']",
            "url_xpath": "//div[@class='card']/h4/a"
        })),
        ModelResponse::Json(json!({"fields": [
            {"name": "title", "xpath": "//h4/a", "extract_mode": "text"},
            {"name": "price", "xpath": "//span[@class='price']", "extract_mode": "text"}
        ]})),
        ModelResponse::Json(json!({"sections": []})),
    ]));
    let parser = ParserAi::new(
        model.clone() as Arc<dyn LanguageModel>,
        None,
        &settings.discovery,
    );
    let site = MockSite::catalog(12, 5);

    let discover = DiscoverUseCase::new(Arc::new(parser), &settings.scraping);
    let config = discover
        .discover(START, &site.driver(), &AcceptAll, false)
        .await
        .unwrap();

    assert_eq!(model.calls(), 5);
    assert_eq!(config.page_type, WebpageType::Catalog);
    assert_eq!(
        config.pagination,
        Pagination::Xpath {
            xpath: "//*[@class='next']".to_string()
        }
    );
    assert_eq!(config.max_pages, settings.scraping.default_max_pages);
    assert!(config.fields.static_fields.iter().all(|f| f.color.is_some()));

    let driver = site.driver();
    let records = ScrapeEngine::from_settings(&settings.scraping)
        .scrape_all(&config, &driver)
        .await
        .unwrap();
    assert_eq!(records.len(), 12);
    assert_eq!(records[0]["title"], json!("Item 1"));
    assert_eq!(records[11]["price"], json!("12.99"));
}

#[tokio::test]
async fn test_table_row_catalog_is_discovered_and_scraped() {
    let settings = Settings::from_toml_str(NO_DELAYS).unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        ModelResponse::Text("catalog".to_string()),
        ModelResponse::Json(json!({"classname": "next"})),
        ModelResponse::Json(json!({
            "card_xpath": "//tr[@class='row']",
            "url_xpath": "//tr[@class='row']/td[1]/a"
        })),
        ModelResponse::Json(json!({"fields": [
            {"name": "title", "xpath": "/tr/td[1]/a", "extract_mode": "text"},
            {"name": "price", "xpath": "/tr/td[@class='price']", "extract_mode": "text"}
        ]})),
        ModelResponse::Json(json!({"sections": []})),
    ]));
    let parser = ParserAi::new(
        model.clone() as Arc<dyn LanguageModel>,
        None,
        &settings.discovery,
    );
    let site = MockSite::table_catalog(3);

    let config = DiscoverUseCase::new(Arc::new(parser), &settings.scraping)
        .discover(START, &site.driver(), &AcceptAll, false)
        .await
        .unwrap();

    assert_eq!(model.calls(), 5);
    assert_eq!(config.fields.static_fields.len(), 2);
    assert_eq!(
        config.fields.static_fields[0].sample_value,
        Some(FieldValue::Single("Item 1".to_string()))
    );

    let records = ScrapeEngine::from_settings(&settings.scraping)
        .scrape_all(&config, &site.driver())
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["title"], json!("Item 1"));
    assert_eq!(records[2]["price"], json!("3.99"));
}

#[tokio::test]
async fn test_unrecognised_page_yields_empty_config() {
    let settings = Settings::from_toml_str(NO_DELAYS).unwrap();
    let model = Arc::new(ScriptedModel::new(vec![ModelResponse::Text(
        "captcha".to_string(),
    )]));
    let parser = ParserAi::new(model as Arc<dyn LanguageModel>, None, &settings.discovery);
    let site = MockSite::catalog(2, 2);

    let config = DiscoverUseCase::new(Arc::new(parser), &settings.scraping)
        .discover(START, &site.driver(), &AcceptAll, false)
        .await
        .unwrap();

    assert_eq!(config.page_type, WebpageType::Captcha);
    assert!(config.catalog_item.is_none());
    assert!(ScrapeEngine::from_settings(&settings.scraping)
        .scrape(&config, &site.driver())
        .is_err());
}
