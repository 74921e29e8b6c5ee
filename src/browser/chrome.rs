//! Chrome driver
//!
//! Launches and controls a real Chrome/Chromium instance over CDP. All DOM
//! interaction goes through JavaScript evaluation so element handles stay
//! valid references (selector + index) instead of remote object ids.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::driver::{Driver, ElementHandle, LaunchProfile, Launcher};
use super::BrowserError;

/// Find Chrome/Chromium executable on the system
pub fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(r"{}\Google\Chrome\Application\chrome.exe", local)));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Launches real Chrome instances.
pub struct ChromeLauncher;

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn Driver>, BrowserError> {
        let driver = ChromeDriver::launch(profile).await?;
        Ok(Arc::new(driver))
    }

    fn available(&self) -> bool {
        find_chrome().is_some()
    }
}

/// One Chrome instance with a single automated page.
pub struct ChromeDriver {
    session_id: String,
    browser: Mutex<Option<Browser>>,
    page: Mutex<Option<Page>>,
    alive: Arc<AtomicBool>,
}

impl ChromeDriver {
    pub async fn launch(profile: &LaunchProfile) -> Result<Self, BrowserError> {
        let chrome_path = find_chrome().ok_or_else(|| {
            BrowserError::LaunchFailed(
                "Chrome not found. Install Google Chrome or Chromium and restart.".to_string(),
            )
        })?;

        info!(
            "Launching browser for {} (headless: {})",
            profile.session_id, profile.headless
        );

        // Unique per launch so a stale profile dir from a crashed run
        // cannot be reused.
        let user_data_dir = std::env::temp_dir()
            .join("traffic-bot")
            .join("browser_data")
            .join(format!("{}-{}", profile.session_id, uuid::Uuid::new_v4()));
        let _ = std::fs::create_dir_all(&user_data_dir);

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&user_data_dir)
            .window_size(profile.window_width, profile.window_height)
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            .arg("--disable-notifications")
            .arg("--disable-translate")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");

        if profile.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = profile.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.server_arg()));
        }

        let config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Drain CDP events; when the stream ends Chrome has disconnected.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let session_id = profile.session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("Session {} browser event error: {:?}", session_id, event);
                }
            }
            warn!("Session {} Chrome disconnected (event handler ended)", session_id);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        page.set_user_agent(&profile.user_agent)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        Ok(Self {
            session_id: profile.session_id.clone(),
            browser: Mutex::new(Some(browser)),
            page: Mutex::new(Some(page)),
            alive,
        })
    }

    fn check_alive(&self) -> Result<(), BrowserError> {
        if self.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrowserError::ConnectionLost(format!(
                "Chrome for session {} is gone",
                self.session_id
            )))
        }
    }

    async fn eval_on_page(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.check_alive()?;
        let guard = self.page.lock().await;
        let page = guard
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("page already closed".to_string()))?;

        let result = page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.check_alive()?;
        let guard = self.page.lock().await;
        let page = guard
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("page already closed".to_string()))?;

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("Navigation to {} timed out", url)))?
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        // Ignore wait failures: a slow subresource should not fail the visit.
        let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.eval_on_page(script).await
    }

    async fn find_visible(&self, selector: &str) -> Result<Vec<ElementHandle>, BrowserError> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        let script = format!(
            r#"(function() {{
                const els = Array.from(document.querySelectorAll({sel}));
                const visible = [];
                els.forEach((el, i) => {{
                    const rect = el.getBoundingClientRect();
                    const style = window.getComputedStyle(el);
                    if (rect.width > 0 && rect.height > 0 &&
                        style.visibility !== 'hidden' && style.display !== 'none') {{
                        visible.push(i);
                    }}
                }});
                return visible;
            }})()"#
        );

        let value = self.eval_on_page(&script).await?;
        let indices = value.as_array().cloned().unwrap_or_default();

        Ok(indices
            .into_iter()
            .filter_map(|v| v.as_u64())
            .map(|i| ElementHandle { selector: selector.to_string(), index: i as usize })
            .collect())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        let sel = serde_json::to_string(&element.selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        let script = format!(
            r#"(function() {{
                const el = document.querySelectorAll({sel})[{idx}];
                if (!el) return false;
                el.scrollIntoView({{behavior: 'smooth', block: 'center'}});
                return true;
            }})()"#,
            idx = element.index
        );

        match self.eval_on_page(&script).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound(element.selector.clone())),
        }
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        let sel = serde_json::to_string(&element.selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        let script = format!(
            r#"(function() {{
                const el = document.querySelectorAll({sel})[{idx}];
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            idx = element.index
        );

        match self.eval_on_page(&script).await?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound(element.selector.clone())),
        }
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.eval_on_page("window.history.back()").await?;
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), BrowserError> {
        self.check_alive()?;
        let guard = self.page.lock().await;
        let page = guard
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("page already closed".to_string()))?;

        page.execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(page) = self.page.lock().await.take() {
            let _ = page.close().await;
        }

        if let Some(mut browser) = self.browser.lock().await.take() {
            let _ = browser.close().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = browser.kill().await;
            info!("Session {} browser closed", self.session_id);
        }

        self.alive.store(false, Ordering::Relaxed);
    }
}
