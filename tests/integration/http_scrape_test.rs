// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{catalog_config, catalog_page};
use pageshape::application::use_cases::ScrapeEngine;
use pageshape::domain::models::Pagination;
use pageshape::engines::reqwest_engine::HttpDriver;
use pageshape::engines::SwitchDelays;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(server: &MockServer, page: Option<&str>, body: String) {
    let mock = Mock::given(method("GET")).and(path("/list"));
    let mock = match page {
        Some(page) => mock.and(query_param("page", page)),
        None => mock,
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_url_param_pagination_over_http_stops_on_repeated_page() {
    let server = MockServer::start().await;
    // specific pages first so they win over the bare path
    mount_page(&server, Some("2"), catalog_page(3..=4)).await;
    mount_page(&server, Some("3"), catalog_page(3..=4)).await;
    mount_page(&server, None, catalog_page(1..=2)).await;

    let mut config = catalog_config(10, 100);
    config.start_url = format!("{}/list", server.uri());
    config.pagination = Pagination::UrlParam {
        param_name: "page".to_string(),
        first_value: 1,
    };
    let driver = HttpDriver::new(Duration::from_secs(5)).unwrap();

    let records = ScrapeEngine::new(SwitchDelays::none(), Duration::ZERO)
        .scrape_all(&config, &driver)
        .await
        .unwrap();

    let titles: Vec<_> = records.iter().map(|r| r["title"].clone()).collect();
    assert_eq!(
        titles,
        vec![json!("Item 1"), json!("Item 2"), json!("Item 3"), json!("Item 4")]
    );
}

#[tokio::test]
async fn test_nested_links_resolve_against_start_url() {
    let server = MockServer::start().await;
    mount_page(&server, None, catalog_page(1..=2)).await;
    for id in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/p/{}", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body><h1>Product {}</h1></body></html>", id)),
            )
            .mount(&server)
            .await;
    }

    let mut config = catalog_config(1, 100);
    config.start_url = format!("{}/list", server.uri());
    config.pagination = Pagination::None;
    config.open_nested_pages = true;
    config.fields.static_fields.truncate(1);
    config.fields.static_fields[0].xpath = "//h1".to_string();
    let driver = HttpDriver::new(Duration::from_secs(5)).unwrap();

    let records = ScrapeEngine::new(SwitchDelays::none(), Duration::ZERO)
        .scrape_all(&config, &driver)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["url"], json!(format!("{}/p/2", server.uri())));
    assert_eq!(records[1]["title"], json!("Product 2"));
}
