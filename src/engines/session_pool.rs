// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::BackendSettings;
use crate::engines::chrome_engine::ChromeDriver;
use crate::engines::traits::{DriverError, PageDriver};
use crate::utils::url_utils;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::Browser;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 会话池错误类型
#[derive(Error, Debug)]
pub enum PoolError {
    /// 所有后端都已满
    #[error("Too many sessions: every browser backend is at capacity")]
    TooManySessions,
    /// 未配置的后端
    #[error("Unknown browser backend: {0}")]
    UnknownBackend(String),
    /// 创建会话超时
    #[error("Starting a session on backend {0} timed out")]
    Timeout(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// 会话启动器特质
///
/// 会话池只负责计数，具体如何在后端上创建或重新连接会话由启动器决定。
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// 在后端上创建新会话，返回会话id和驱动
    async fn start(
        &self,
        backend: &BackendSettings,
    ) -> Result<(String, Box<dyn PageDriver>), DriverError>;

    /// 连接到后端上已在运行的会话
    async fn attach(
        &self,
        backend: &BackendSettings,
        session_id: &str,
    ) -> Result<Box<dyn PageDriver>, DriverError>;
}

type Counters = Arc<Mutex<HashMap<String, usize>>>;

/// 一个后端上被占用的名额，析构时归还
struct Slot {
    backend_id: String,
    counters: Counters,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut counters = self.counters.lock();
        if let Some(count) = counters.get_mut(&self.backend_id) {
            *count = count.saturating_sub(1);
            report_active(&self.backend_id, *count);
        }
    }
}

fn report_active(backend_id: &str, count: usize) {
    metrics::gauge!("pageshape_browser_sessions_active", "backend" => backend_id.to_string())
        .set(count as f64);
}

/// 会话租约
///
/// 独占一个远程浏览器会话；`release` 结束会话并归还名额。
/// 未释放就被丢弃的租约同样会归还名额。
pub struct SessionLease {
    backend_id: String,
    session_id: String,
    leased_at: DateTime<Utc>,
    endpoint: String,
    driver: Option<Box<dyn PageDriver>>,
    slot: Option<Slot>,
}

impl SessionLease {
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn leased_at(&self) -> DateTime<Utc> {
        self.leased_at
    }

    /// 是否占用名额（重新连接得到的会话只观察，不占用）
    pub fn is_owned(&self) -> bool {
        self.slot.is_some()
    }

    /// 远程观察地址
    pub fn vnc_url(&self) -> Option<String> {
        url_utils::vnc_url(&self.endpoint, &self.session_id).ok()
    }

    pub fn driver(&self) -> &dyn PageDriver {
        &**self
    }

    /// 结束会话并归还名额
    ///
    /// 驱动退出失败只记录日志；只观察的会话不会被关闭。
    pub async fn release(mut self) {
        let driver = self.driver.take();
        if let (Some(driver), true) = (driver, self.is_owned()) {
            if let Err(e) = driver.quit().await {
                warn!(
                    "Failed to quit session {} on backend {}: {}",
                    self.session_id, self.backend_id, e
                );
            }
        }
        debug!("Session {} released", self.session_id);
        // slot is returned when self drops
    }
}

impl Deref for SessionLease {
    type Target = dyn PageDriver;

    fn deref(&self) -> &Self::Target {
        match &self.driver {
            Some(driver) => driver.as_ref(),
            None => &ReleasedDriver,
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        if self.slot.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session_id = self.session_id.clone();
                handle.spawn(async move {
                    if let Err(e) = driver.quit().await {
                        warn!("Failed to quit dropped session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "Session {} on backend {} dropped outside a Tokio runtime, remote page left open",
                self.session_id, self.backend_id
            ),
        }
    }
}

/// 已释放会话的占位驱动
struct ReleasedDriver;

#[async_trait]
impl PageDriver for ReleasedDriver {
    fn name(&self) -> &'static str {
        "released"
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        Err(DriverError::Navigation {
            url: url.to_string(),
            reason: "session was released".to_string(),
        })
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        Err(DriverError::NoPage)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Err(DriverError::NoPage)
    }
}

/// 浏览器会话池
///
/// 按配置顺序选择第一个未满的后端；满时立即返回 `TooManySessions`，
/// 不阻塞等待，调用方自行重试。计数在同一把锁下增减。
pub struct BrowserSessionPool {
    backends: Vec<BackendSettings>,
    launcher: Arc<dyn SessionLauncher>,
    counters: Counters,
}

impl BrowserSessionPool {
    pub fn new(backends: Vec<BackendSettings>, launcher: Arc<dyn SessionLauncher>) -> Self {
        let counters = backends.iter().map(|b| (b.id.clone(), 0)).collect();
        Self {
            backends,
            launcher,
            counters: Arc::new(Mutex::new(counters)),
        }
    }

    /// 当前占用数
    pub fn active_sessions(&self, backend_id: &str) -> usize {
        self.counters.lock().get(backend_id).copied().unwrap_or(0)
    }

    /// 租用一个会话
    ///
    /// # 返回值
    ///
    /// * `Ok(SessionLease)` - 新会话
    /// * `Err(PoolError::TooManySessions)` - 所有后端都已满
    /// * `Err(PoolError::Timeout)` - 在后端上创建会话超时（名额已归还）
    pub async fn lease(&self) -> Result<SessionLease, PoolError> {
        let (backend, slot) = self.reserve()?;
        let started = tokio::time::timeout(backend.timeout(), self.launcher.start(backend)).await;
        let (session_id, driver) = match started {
            Ok(result) => result?,
            Err(_) => return Err(PoolError::Timeout(backend.id.clone())),
        };
        info!("Leased session {} on backend {}", session_id, backend.id);
        Ok(SessionLease {
            backend_id: backend.id.clone(),
            session_id,
            leased_at: Utc::now(),
            endpoint: backend.endpoint.clone(),
            driver: Some(driver),
            slot: Some(slot),
        })
    }

    fn reserve(&self) -> Result<(&BackendSettings, Slot), PoolError> {
        let mut counters = self.counters.lock();
        for backend in &self.backends {
            let count = counters.entry(backend.id.clone()).or_insert(0);
            if *count < backend.max_sessions {
                *count += 1;
                report_active(&backend.id, *count);
                return Ok((
                    backend,
                    Slot {
                        backend_id: backend.id.clone(),
                        counters: self.counters.clone(),
                    },
                ));
            }
        }
        Err(PoolError::TooManySessions)
    }

    /// 连接到已在运行的会话（不占用名额）
    pub async fn reattach(
        &self,
        backend_id: &str,
        session_id: &str,
    ) -> Result<SessionLease, PoolError> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.id == backend_id)
            .ok_or_else(|| PoolError::UnknownBackend(backend_id.to_string()))?;
        let driver = tokio::time::timeout(backend.timeout(), self.launcher.attach(backend, session_id))
            .await
            .map_err(|_| PoolError::Timeout(backend.id.clone()))??;
        Ok(SessionLease {
            backend_id: backend.id.clone(),
            session_id: session_id.to_string(),
            leased_at: Utc::now(),
            endpoint: backend.endpoint.clone(),
            driver: Some(driver),
            slot: None,
        })
    }

    /// 结束会话并归还名额
    pub async fn release(&self, lease: SessionLease) {
        lease.release().await;
    }
}

/// 通过DevTools端点创建会话的启动器
///
/// 每个后端只建立一次浏览器连接，会话是该浏览器中的页面。
#[derive(Default)]
pub struct CdpSessionLauncher {
    browsers: tokio::sync::Mutex<HashMap<String, Arc<Browser>>>,
}

impl CdpSessionLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn browser(&self, backend: &BackendSettings) -> Result<Arc<Browser>, DriverError> {
        let mut browsers = self.browsers.lock().await;
        if let Some(browser) = browsers.get(&backend.id) {
            return Ok(browser.clone());
        }
        info!("Connecting to remote Chrome instance at: {}", backend.endpoint);
        let (browser, mut handler) = Browser::connect(backend.endpoint.as_str())
            .await
            .map_err(|e| DriverError::Browser(format!("Failed to connect to remote Chrome: {}", e)))?;

        // Spawn a handler to process browser events
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let browser = Arc::new(browser);
        browsers.insert(backend.id.clone(), browser.clone());
        Ok(browser)
    }
}

#[async_trait]
impl SessionLauncher for CdpSessionLauncher {
    async fn start(
        &self,
        backend: &BackendSettings,
    ) -> Result<(String, Box<dyn PageDriver>), DriverError> {
        let browser = self.browser(backend).await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))?;
        let driver = ChromeDriver::new(page);
        Ok((driver.session_id().to_string(), Box::new(driver)))
    }

    async fn attach(
        &self,
        backend: &BackendSettings,
        session_id: &str,
    ) -> Result<Box<dyn PageDriver>, DriverError> {
        let browser = self.browser(backend).await?;
        let page = browser
            .get_page(TargetId::new(session_id))
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))?;
        Ok(Box::new(ChromeDriver::new(page)))
    }
}

#[cfg(test)]
#[path = "session_pool_test.rs"]
mod tests;
