// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{catalog_config, MockSite};
use futures::TryStreamExt;
use pageshape::application::use_cases::ScrapeEngine;
use pageshape::domain::models::{DynamicField, Record, ScraperConfig, WebpageType};
use pageshape::engines::SwitchDelays;
use serde_json::json;
use std::time::Duration;

fn engine() -> ScrapeEngine {
    ScrapeEngine::new(SwitchDelays::none(), Duration::ZERO)
}

#[tokio::test]
async fn test_max_rows_stops_before_loading_more_pages() {
    let site = MockSite::catalog(18, 6);
    let driver = site.driver();
    let config = catalog_config(10, 10);

    let records: Vec<Record> = engine()
        .scrape(&config, &driver)
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(records[9]["title"], json!("Item 10"));
    assert_eq!(driver.navigations(), 1);
    assert_eq!(driver.clicks(), 1);
}

#[tokio::test]
async fn test_twelve_cards_with_ten_rows_yield_ten() {
    let site = MockSite::catalog(24, 12);
    let driver = site.driver();
    let config = catalog_config(10, 10);

    let records = engine().scrape_all(&config, &driver).await.unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(driver.navigations(), 1);
    assert_eq!(driver.clicks(), 0);
}

#[tokio::test]
async fn test_pagination_runs_until_the_last_page() {
    let site = MockSite::catalog(14, 6);
    let driver = site.driver();
    let config = catalog_config(10, 100);

    let records = engine().scrape_all(&config, &driver).await.unwrap();

    assert_eq!(records.len(), 14);
    assert_eq!(records[13]["price"], json!("14.99"));
    // two successful switches and one that finds no next page
    assert_eq!(driver.clicks(), 3);
}

#[tokio::test]
async fn test_persisted_config_replays_identically() {
    let site = MockSite::catalog(9, 4);
    let config = catalog_config(3, 50);

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), config.to_json().unwrap()).unwrap();
    let reloaded =
        ScraperConfig::from_json(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
    assert_eq!(reloaded, config);

    let first = engine().scrape_all(&config, &site.driver()).await.unwrap();
    let second = engine().scrape_all(&reloaded, &site.driver()).await.unwrap();
    assert_eq!(first.len(), 9);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_nested_pages_follow_card_links() {
    let site = MockSite::catalog(5, 3);
    let driver = site.driver();
    let mut config = catalog_config(5, 4);
    config.open_nested_pages = true;
    config.fields.static_fields.truncate(0);
    config.fields.dynamic_fields.push(DynamicField {
        section_name: "specs".to_string(),
        name_xpath: "//dt".to_string(),
        value_xpath: "//dd".to_string(),
        sample_values: Vec::new(),
        color: None,
    });

    let records = engine().scrape_all(&config, &driver).await.unwrap();

    assert_eq!(records.len(), 4);
    assert_eq!(
        serde_json::Value::Object(records[3].clone()),
        json!({"url": "https://shop.example/p/4", "Weight": "4 kg", "Color": "Blue"})
    );
}

#[tokio::test]
async fn test_details_config_scrapes_start_page() {
    let mut config = ScraperConfig::new("https://shop.example/p/2", WebpageType::Details);
    config.fields.dynamic_fields.push(DynamicField {
        section_name: "specs".to_string(),
        name_xpath: "//dt".to_string(),
        value_xpath: "//dd".to_string(),
        sample_values: Vec::new(),
        color: None,
    });
    let driver = MockSite::catalog(3, 3).driver();

    let records = engine().scrape_all(&config, &driver).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["url"], json!("https://shop.example/p/2"));
    assert_eq!(records[0]["Weight"], json!("2 kg"));
}
