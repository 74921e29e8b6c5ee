//! Scripted driver for pipeline tests. Records every interaction and
//! answers DOM queries from a fixed table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::driver::{Driver, ElementHandle, LaunchProfile, Launcher};
use super::BrowserError;

#[derive(Default)]
pub struct FakeDriver {
    pub actions: Mutex<Vec<String>>,
    /// Selector -> number of visible matches to report.
    pub elements: Mutex<HashMap<String, usize>>,
    pub fail_navigation: bool,
    pub close_count: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_navigation() -> Self {
        Self { fail_navigation: true, ..Self::default() }
    }

    pub fn with_elements(self, selector: &str, count: usize) -> Self {
        self.elements.lock().insert(selector.to_string(), count);
        self
    }

    pub fn record(&self, action: impl Into<String>) {
        self.actions.lock().push(action.into());
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.close_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        if self.fail_navigation {
            return Err(BrowserError::NavigationFailed(format!("no route to {}", url)));
        }
        self.record(format!("navigate:{}", url));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.record(format!("evaluate:{}", script));
        if script.contains("scrollHeight") {
            return Ok(serde_json::json!(2400.0));
        }
        Ok(serde_json::Value::Null)
    }

    async fn find_visible(&self, selector: &str) -> Result<Vec<ElementHandle>, BrowserError> {
        let count = self.elements.lock().get(selector).copied().unwrap_or(0);
        Ok((0..count)
            .map(|index| ElementHandle { selector: selector.to_string(), index })
            .collect())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.record(format!("scroll_into_view:{}:{}", element.selector, element.index));
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.record(format!("click:{}:{}", element.selector, element.index));
        Ok(())
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.record("go_back");
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), BrowserError> {
        self.record("clear_cookies");
        Ok(())
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hands out one shared fake driver, or refuses to launch.
pub struct FakeLauncher {
    pub driver: Arc<FakeDriver>,
    pub fail_launch: bool,
}

impl FakeLauncher {
    pub fn new(driver: Arc<FakeDriver>) -> Self {
        Self { driver, fail_launch: false }
    }

    pub fn failing() -> Self {
        Self { driver: Arc::new(FakeDriver::new()), fail_launch: true }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _profile: &LaunchProfile) -> Result<Arc<dyn Driver>, BrowserError> {
        if self.fail_launch {
            return Err(BrowserError::LaunchFailed("no browser installed".to_string()));
        }
        Ok(self.driver.clone())
    }

    fn available(&self) -> bool {
        !self.fail_launch
    }
}
