//! Traffic Bot
//!
//! Automated browsing sessions behind an HTTP control surface. Each session
//! drives one headless Chrome instance through a fixed visit pipeline
//! (navigate, scroll, dismiss ads, click a post, clear cookies) and records
//! its progress in flat JSON documents that clients poll.

pub mod agents;
pub mod bot;
pub mod browser;
pub mod proxy;
pub mod registry;
pub mod store;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bot::Pacing;
use browser::{ChromeLauncher, Launcher};
use proxy::ProxyManager;
use registry::SessionRegistry;
use store::JsonStore;

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("traffic-bot").join("logs"))
}

/// Headless unless a display is available. Hosted deployments
/// (RAILWAY_ENVIRONMENT) are always headless.
pub fn default_headless() -> bool {
    if std::env::var("RAILWAY_ENVIRONMENT").is_ok() {
        return true;
    }
    if cfg!(unix) && !cfg!(target_os = "macos") {
        return std::env::var("DISPLAY").is_err();
    }
    false
}

/// Application state shared across the app
pub struct AppState {
    /// Persistent JSON documents (sessions, logs, profiles, config)
    pub store: Arc<JsonStore>,
    /// In-flight session handles
    pub registry: Arc<SessionRegistry>,
    /// Browser backend
    pub launcher: Arc<dyn Launcher>,
    /// Optional pool of upstream proxies
    pub proxy_manager: Arc<ProxyManager>,
    /// Whether sessions run headless
    pub headless: bool,
    /// Pipeline delays
    pub pacing: Pacing,
    /// Navigation timeout applied to every page load
    pub nav_timeout: Duration,
}

impl AppState {
    /// Create new application state rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let store = Arc::new(JsonStore::new(data_dir));
        let proxies_path = store.data_dir().join("proxies.json");

        Self {
            store,
            registry: Arc::new(SessionRegistry::new()),
            launcher: Arc::new(ChromeLauncher),
            proxy_manager: Arc::new(ProxyManager::load_from_file(&proxies_path)),
            headless: default_headless(),
            pacing: Pacing::default(),
            nav_timeout: Duration::from_secs(30),
        }
    }
}

/// Initialize logging (console plus daily rolling file)
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "traffic-bot.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
