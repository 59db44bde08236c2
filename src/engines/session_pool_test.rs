// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct StubDriver {
    quits: Arc<AtomicUsize>,
}

#[async_trait]
impl PageDriver for StubDriver {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        Ok("<html></html>".to_string())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok("about:blank".to_string())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Err(DriverError::Browser("already dead".to_string()))
    }
}

#[derive(Default)]
struct StubLauncher {
    started: AtomicUsize,
    quits: Arc<AtomicUsize>,
    fail: bool,
    slow: bool,
}

#[async_trait]
impl SessionLauncher for StubLauncher {
    async fn start(
        &self,
        _backend: &BackendSettings,
    ) -> Result<(String, Box<dyn PageDriver>), DriverError> {
        if self.slow {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail {
            return Err(DriverError::Browser("cannot start".to_string()));
        }
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        Ok((
            format!("session-{}", n),
            Box::new(StubDriver {
                quits: self.quits.clone(),
            }),
        ))
    }

    async fn attach(
        &self,
        _backend: &BackendSettings,
        _session_id: &str,
    ) -> Result<Box<dyn PageDriver>, DriverError> {
        Ok(Box::new(StubDriver {
            quits: self.quits.clone(),
        }))
    }
}

fn backend(id: &str, max_sessions: usize) -> BackendSettings {
    BackendSettings {
        id: id.to_string(),
        endpoint: format!("http://{}.example:9222", id),
        max_sessions,
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_n_plus_one_leases_fail_exactly_once() {
    let launcher = Arc::new(StubLauncher::default());
    let pool = BrowserSessionPool::new(vec![backend("local", 3)], launcher);

    let results = futures::future::join_all((0..4).map(|_| pool.lease())).await;
    let failures = results
        .iter()
        .filter(|r| matches!(r, Err(PoolError::TooManySessions)))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(pool.active_sessions("local"), 3);

    let mut leases: Vec<SessionLease> = results.into_iter().filter_map(Result::ok).collect();
    pool.release(leases.pop().unwrap()).await;
    assert_eq!(pool.active_sessions("local"), 2);
    assert!(pool.lease().await.is_ok());
}

#[tokio::test]
async fn test_backends_are_scanned_in_order() {
    let launcher = Arc::new(StubLauncher::default());
    let pool = BrowserSessionPool::new(vec![backend("first", 1), backend("second", 1)], launcher);

    let a = pool.lease().await.unwrap();
    let b = pool.lease().await.unwrap();
    assert_eq!(a.backend_id(), "first");
    assert_eq!(b.backend_id(), "second");
    assert!(matches!(pool.lease().await, Err(PoolError::TooManySessions)));
    assert_eq!(a.vnc_url().as_deref(), Some("ws://first.example:9222/vnc/session-0"));
}

#[tokio::test]
async fn test_release_swallows_quit_failure_and_drop_returns_slot() {
    let launcher = Arc::new(StubLauncher::default());
    let quits = launcher.quits.clone();
    let pool = BrowserSessionPool::new(vec![backend("local", 1)], launcher);

    let lease = pool.lease().await.unwrap();
    assert_eq!(lease.page_source().await.unwrap(), "<html></html>");
    lease.release().await;
    assert_eq!(quits.load(Ordering::SeqCst), 1);
    assert_eq!(pool.active_sessions("local"), 0);

    let lease = pool.lease().await.unwrap();
    drop(lease);
    assert_eq!(pool.active_sessions("local"), 0);
}

#[test]
fn test_drop_outside_runtime_skips_quit_but_returns_slot() {
    let launcher = Arc::new(StubLauncher::default());
    let quits = launcher.quits.clone();
    let pool = BrowserSessionPool::new(vec![backend("local", 1)], launcher);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let lease = runtime.block_on(pool.lease()).unwrap();
    assert_eq!(pool.active_sessions("local"), 1);

    drop(lease);
    assert_eq!(quits.load(Ordering::SeqCst), 0);
    assert_eq!(pool.active_sessions("local"), 0);
}

#[tokio::test]
async fn test_failed_start_returns_slot() {
    let launcher = Arc::new(StubLauncher {
        fail: true,
        ..StubLauncher::default()
    });
    let pool = BrowserSessionPool::new(vec![backend("local", 1)], launcher);
    assert!(matches!(pool.lease().await, Err(PoolError::Driver(_))));
    assert_eq!(pool.active_sessions("local"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_returns_slot() {
    let launcher = Arc::new(StubLauncher {
        slow: true,
        ..StubLauncher::default()
    });
    let pool = BrowserSessionPool::new(vec![backend("local", 1)], launcher);
    assert!(matches!(pool.lease().await, Err(PoolError::Timeout(ref id)) if id == "local"));
    assert_eq!(pool.active_sessions("local"), 0);
}

#[tokio::test]
async fn test_reattach_does_not_take_a_slot() {
    let launcher = Arc::new(StubLauncher::default());
    let quits = launcher.quits.clone();
    let pool = BrowserSessionPool::new(vec![backend("local", 1)], launcher);

    let observer = pool.reattach("local", "abc").await.unwrap();
    assert!(!observer.is_owned());
    assert_eq!(observer.session_id(), "abc");
    assert_eq!(pool.active_sessions("local"), 0);
    observer.release().await;
    assert_eq!(quits.load(Ordering::SeqCst), 0);

    assert!(matches!(
        pool.reattach("missing", "abc").await,
        Err(PoolError::UnknownBackend(_))
    ));
}
