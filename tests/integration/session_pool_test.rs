// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{catalog_config, MockSite};
use async_trait::async_trait;
use pageshape::application::use_cases::ScrapeEngine;
use pageshape::config::BackendSettings;
use pageshape::engines::session_pool::{BrowserSessionPool, PoolError, SessionLauncher};
use pageshape::engines::{DriverError, PageDriver, SwitchDelays};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockLauncher {
    site: MockSite,
    started: AtomicUsize,
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn start(
        &self,
        _backend: &BackendSettings,
    ) -> Result<(String, Box<dyn PageDriver>), DriverError> {
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        Ok((format!("mock-{}", n), Box::new(self.site.driver())))
    }

    async fn attach(
        &self,
        _backend: &BackendSettings,
        _session_id: &str,
    ) -> Result<Box<dyn PageDriver>, DriverError> {
        Ok(Box::new(self.site.driver()))
    }
}

fn pool(max_sessions: usize) -> BrowserSessionPool {
    let backend = BackendSettings {
        id: "local".to_string(),
        endpoint: "http://127.0.0.1:9222".to_string(),
        max_sessions,
        timeout_secs: 5,
    };
    BrowserSessionPool::new(
        vec![backend],
        Arc::new(MockLauncher {
            site: MockSite::catalog(7, 4),
            started: AtomicUsize::new(0),
        }),
    )
}

#[tokio::test]
async fn test_concurrent_leases_beyond_capacity_fail_fast() {
    let pool = pool(3);
    let results = futures::future::join_all((0..4).map(|_| pool.lease())).await;

    let failures = results
        .iter()
        .filter(|r| matches!(r, Err(PoolError::TooManySessions)))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(pool.active_sessions("local"), 3);

    for lease in results.into_iter().flatten() {
        pool.release(lease).await;
    }
    assert_eq!(pool.active_sessions("local"), 0);
}

#[tokio::test]
async fn test_leased_session_drives_a_scrape() {
    let pool = pool(1);
    let lease = pool.lease().await.unwrap();
    let config = catalog_config(5, 100);

    let records = ScrapeEngine::new(SwitchDelays::none(), Duration::ZERO)
        .scrape_all(&config, lease.driver())
        .await
        .unwrap();
    assert_eq!(records.len(), 7);

    pool.release(lease).await;
    assert!(pool.lease().await.is_ok());
}
