//! Live session registry
//!
//! Tracks in-flight sessions so stop requests can reach the task that owns
//! the browser. Holds only runtime state; the persistent record lives in
//! the sessions document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::browser::Driver;

/// Shared handle to one running session.
#[derive(Clone)]
pub struct SessionHandle {
    running: Arc<AtomicBool>,
    driver: Arc<Mutex<Option<Arc<dyn Driver>>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    /// The pipeline polls this between phases and inside scroll passes.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request the session to stop at its next checkpoint.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub async fn set_driver(&self, driver: Arc<dyn Driver>) {
        *self.driver.lock().await = Some(driver);
    }

    pub async fn take_driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.lock().await.take()
    }

    /// Close the browser immediately if one is attached. Used by stop
    /// requests so a stalled navigation cannot hold the session open.
    pub async fn force_close(&self) {
        if let Some(driver) = self.take_driver().await {
            driver.close().await;
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// All currently running sessions, keyed by session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn insert(&self, session_id: &str, handle: SessionHandle) {
        self.sessions.write().await.insert(session_id.to_string(), handle);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.write().await.remove(session_id);
        if handle.is_some() {
            info!("Session {} removed from registry", session_id);
        }
        handle
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
