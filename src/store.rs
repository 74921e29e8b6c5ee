//! Flat-file JSON persistence
//!
//! Four whole-document JSON files hold all state: profiles, sessions, logs,
//! and config. Every mutation is read-whole / modify / write-whole under a
//! per-document lock, so in-process writers cannot clobber each other; the
//! on-disk format stays a single pretty-printed JSON blob per collection.
//! Missing or corrupt files load as the type-appropriate empty default.
//! Writes are best-effort: failures go to the operator log only.

use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::bot::{SessionStatus, Step};
use crate::proxy::ProxyConfig;

pub const PROFILES_FILE: &str = "profiles.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const LOGS_FILE: &str = "logs.json";
pub const CONFIG_FILE: &str = "config.json";

/// One browsing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub profile_name: String,
    /// Carries the device class string ("mobile"/"desktop"); the field name
    /// is kept for wire compatibility with existing consumers.
    pub user_agent: String,
    pub proxy_config: Option<ProxyConfig>,
    pub target_url: String,
    pub status: SessionStatus,
    pub current_step: Step,
    pub start_time: String,
    pub progress: u8,
}

/// One observation emitted during a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: String,
    pub session_id: String,
    pub timestamp: String,
    pub step: Step,
    pub status: crate::bot::LogStatus,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LogEntry {
    /// Millisecond-derived id; collision-prone under rapid emission, which
    /// consumers are expected to tolerate.
    pub fn new(
        session_id: &str,
        step: Step,
        status: crate::bot::LogStatus,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            log_id: format!("log_{}", chrono::Utc::now().timestamp_millis()),
            session_id: session_id.to_string(),
            timestamp: now_iso(),
            step,
            status,
            message: message.into(),
            details: details.unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

/// A reusable identity descriptor, independent of any session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: String,
    pub profile_name: String,
    pub profile_type: String,
    pub user_agent: String,
    #[serde(default)]
    pub proxy_settings: serde_json::Value,
    pub created_at: String,
    pub last_used: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesDoc {
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for ProfilesDoc {
    fn default() -> Self {
        Self { profiles: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsDoc {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub session_counter: u64,
}

impl Default for SessionsDoc {
    fn default() -> Self {
        Self { sessions: Vec::new(), session_counter: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsDoc {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Default for LogsDoc {
    fn default() -> Self {
        Self { logs: Vec::new() }
    }
}

/// Static tunables, read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub app_name: String,
    pub version: String,
    pub max_sessions: usize,
    pub default_settings: DefaultSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    pub scroll_delay_min: u64,
    pub scroll_delay_max: u64,
    pub session_duration: u64,
    pub auto_clear_cache: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            app_name: "Traffic Bot".to_string(),
            version: "1.0.0".to_string(),
            max_sessions: 5,
            default_settings: DefaultSettings {
                scroll_delay_min: 2,
                scroll_delay_max: 5,
                session_duration: 300,
                auto_clear_cache: true,
            },
        }
    }
}

/// Current local timestamp in ISO-8601 form.
pub fn now_iso() -> String {
    Local::now().to_rfc3339()
}

/// Owns the four JSON documents and serializes access to each.
pub struct JsonStore {
    dir: PathBuf,
    profiles_lock: Mutex<()>,
    sessions_lock: Mutex<()>,
    logs_lock: Mutex<()>,
    config_lock: Mutex<()>,
}

impl JsonStore {
    /// Open a store rooted at `dir`, creating the directory and seeding any
    /// missing document with its default shape.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("Failed to create data directory {:?}: {}", dir, e);
        }

        let store = Self {
            dir,
            profiles_lock: Mutex::new(()),
            sessions_lock: Mutex::new(()),
            logs_lock: Mutex::new(()),
            config_lock: Mutex::new(()),
        };
        store.init_data_files();
        store
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn init_data_files(&self) {
        if !self.path(PROFILES_FILE).exists() {
            self.write_doc(PROFILES_FILE, &ProfilesDoc::default());
        }
        if !self.path(SESSIONS_FILE).exists() {
            self.write_doc(SESSIONS_FILE, &SessionsDoc::default());
        }
        if !self.path(LOGS_FILE).exists() {
            self.write_doc(LOGS_FILE, &LogsDoc::default());
        }
        if !self.path(CONFIG_FILE).exists() {
            self.write_doc(CONFIG_FILE, &BotConfig::default());
        }
    }

    fn read_doc<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Corrupt document {:?}, using defaults: {}", path, e);
                    T::default()
                }
            },
            Err(_) => T::default(),
        }
    }

    fn write_doc<T: Serialize>(&self, name: &str, doc: &T) -> bool {
        let path = self.path(name);
        match serde_json::to_string_pretty(doc) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&path, content) {
                    error!("Error writing to {:?}: {}", path, e);
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                error!("Failed to serialize {:?}: {}", path, e);
                false
            }
        }
    }

    // ----- sessions -----

    /// Read-modify-write over the sessions document, under its lock.
    pub fn update_sessions<R>(&self, f: impl FnOnce(&mut SessionsDoc) -> R) -> R {
        let _guard = self.sessions_lock.lock();
        let mut doc: SessionsDoc = self.read_doc(SESSIONS_FILE);
        let result = f(&mut doc);
        self.write_doc(SESSIONS_FILE, &doc);
        result
    }

    pub fn sessions(&self) -> Vec<Session> {
        let _guard = self.sessions_lock.lock();
        self.read_doc::<SessionsDoc>(SESSIONS_FILE).sessions
    }

    /// Mutate one session record by id. Returns false if no record matched.
    pub fn update_session(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> bool {
        self.update_sessions(|doc| {
            match doc.sessions.iter_mut().find(|s| s.session_id == session_id) {
                Some(session) => {
                    f(session);
                    true
                }
                None => false,
            }
        })
    }

    // ----- logs -----

    pub fn append_log(&self, entry: LogEntry) {
        let _guard = self.logs_lock.lock();
        let mut doc: LogsDoc = self.read_doc(LOGS_FILE);
        doc.logs.push(entry);
        self.write_doc(LOGS_FILE, &doc);
    }

    /// Most recent `n` entries, oldest first.
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        let _guard = self.logs_lock.lock();
        let logs = self.read_doc::<LogsDoc>(LOGS_FILE).logs;
        let skip = logs.len().saturating_sub(n);
        logs.into_iter().skip(skip).collect()
    }

    pub fn all_logs(&self) -> Vec<LogEntry> {
        let _guard = self.logs_lock.lock();
        self.read_doc::<LogsDoc>(LOGS_FILE).logs
    }

    pub fn clear_logs(&self) {
        let _guard = self.logs_lock.lock();
        self.write_doc(LOGS_FILE, &LogsDoc::default());
    }

    // ----- profiles -----

    pub fn update_profiles<R>(&self, f: impl FnOnce(&mut ProfilesDoc) -> R) -> R {
        let _guard = self.profiles_lock.lock();
        let mut doc: ProfilesDoc = self.read_doc(PROFILES_FILE);
        let result = f(&mut doc);
        self.write_doc(PROFILES_FILE, &doc);
        result
    }

    pub fn profiles(&self) -> Vec<Profile> {
        let _guard = self.profiles_lock.lock();
        self.read_doc::<ProfilesDoc>(PROFILES_FILE).profiles
    }

    // ----- config -----

    pub fn config(&self) -> BotConfig {
        let _guard = self.config_lock.lock();
        self.read_doc(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::LogStatus;

    fn temp_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        (dir, store)
    }

    fn sample_session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            profile_name: "desktop_profile_1".to_string(),
            user_agent: "desktop".to_string(),
            proxy_config: None,
            target_url: "https://example.com".to_string(),
            status: SessionStatus::Running,
            current_step: Step::Initializing,
            start_time: now_iso(),
            progress: 0,
        }
    }

    #[test]
    fn seeds_default_documents() {
        let (_dir, store) = temp_store();
        assert!(store.data_dir().join(PROFILES_FILE).exists());
        assert!(store.data_dir().join(SESSIONS_FILE).exists());
        assert!(store.data_dir().join(LOGS_FILE).exists());
        assert!(store.data_dir().join(CONFIG_FILE).exists());

        let config = store.config();
        assert_eq!(config.app_name, "Traffic Bot");
        assert_eq!(config.max_sessions, 5);
        assert!(config.default_settings.auto_clear_cache);
    }

    #[test]
    fn sessions_round_trip() {
        let (_dir, store) = temp_store();

        let id = store.update_sessions(|doc| {
            doc.session_counter += 1;
            let id = format!("sess_{:03}", doc.session_counter);
            doc.sessions.push(sample_session(&id));
            id
        });
        assert_eq!(id, "sess_001");

        let sessions = store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "sess_001");
        assert_eq!(sessions[0].status, SessionStatus::Running);
        assert_eq!(sessions[0].progress, 0);
    }

    #[test]
    fn update_session_mutates_matching_record() {
        let (_dir, store) = temp_store();
        store.update_sessions(|doc| doc.sessions.push(sample_session("sess_001")));

        let found = store.update_session("sess_001", |s| {
            s.current_step = Step::Scrolling;
            s.status = SessionStatus::Running;
            s.progress = s.current_step.progress();
        });
        assert!(found);

        let session = store.sessions().into_iter().next().unwrap();
        assert_eq!(session.current_step, Step::Scrolling);
        assert_eq!(session.progress, 50);

        assert!(!store.update_session("sess_999", |_| {}));
    }

    #[test]
    fn corrupt_document_loads_as_default() {
        let (_dir, store) = temp_store();
        std::fs::write(store.data_dir().join(SESSIONS_FILE), "{not json").unwrap();
        assert!(store.sessions().is_empty());

        std::fs::write(store.data_dir().join(LOGS_FILE), "[]").unwrap();
        assert!(store.all_logs().is_empty());
    }

    #[test]
    fn logs_append_and_tail() {
        let (_dir, store) = temp_store();

        for i in 0..60 {
            store.append_log(LogEntry::new(
                "sess_001",
                Step::Scrolling,
                LogStatus::Success,
                format!("pass {}", i),
                None,
            ));
        }

        assert_eq!(store.all_logs().len(), 60);

        let tail = store.recent_logs(50);
        assert_eq!(tail.len(), 50);
        assert_eq!(tail[0].message, "pass 10");
        assert_eq!(tail[49].message, "pass 59");

        store.clear_logs();
        assert!(store.all_logs().is_empty());
    }

    #[test]
    fn duplicate_log_ids_are_tolerated() {
        let (_dir, store) = temp_store();

        // Rapid emission: millisecond-derived ids may collide.
        for _ in 0..5 {
            store.append_log(LogEntry::new("sess_001", Step::Initializing, LogStatus::Running, "x", None));
        }

        let logs = store.all_logs();
        assert_eq!(logs.len(), 5);
        for entry in &logs {
            assert!(entry.log_id.starts_with("log_"));
        }
    }

    #[test]
    fn profiles_round_trip() {
        let (_dir, store) = temp_store();

        store.update_profiles(|doc| {
            doc.profiles.push(Profile {
                profile_id: "profile_001".to_string(),
                profile_name: "test".to_string(),
                profile_type: "mobile".to_string(),
                user_agent: "ua".to_string(),
                proxy_settings: serde_json::json!({}),
                created_at: now_iso(),
                last_used: None,
            });
        });

        let profiles = store.profiles();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].profile_id, "profile_001");

        store.update_profiles(|doc| doc.profiles.retain(|p| p.profile_id != "profile_001"));
        assert!(store.profiles().is_empty());
    }
}
