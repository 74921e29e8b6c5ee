//! Driver abstraction over the automated browser
//!
//! The session pipeline only talks to these traits. The Chrome
//! implementation lives in `chrome.rs`; tests substitute a scripted fake
//! so pipeline behavior can be exercised without a browser binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::BrowserError;
use crate::proxy::ProxyConfig;

/// Everything needed to launch one browser instance.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub session_id: String,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub headless: bool,
    pub proxy: Option<ProxyConfig>,
}

/// Opaque reference to an element located by a previous query. Valid only
/// against the driver that produced it and only until the next navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

/// A live browser under automation.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the page and wait for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Run a JavaScript expression and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// Elements matching `selector` that are currently visible on the page.
    async fn find_visible(&self, selector: &str) -> Result<Vec<ElementHandle>, BrowserError>;

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    /// History back, best effort.
    async fn go_back(&self) -> Result<(), BrowserError>;

    /// Clear browser cookies for the whole instance.
    async fn clear_cookies(&self) -> Result<(), BrowserError>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&self);
}

/// Launches drivers. One implementation per browser backend.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn Driver>, BrowserError>;

    /// Whether the backing browser binary is present on this host.
    fn available(&self) -> bool;
}
