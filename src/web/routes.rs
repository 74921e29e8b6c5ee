//! HTTP route handlers.
//!
//! Session and profile CRUD plus log retrieval. A create-session request
//! validates input, writes the initial session record, spawns the runner,
//! and returns immediately; clients poll `/sessions` and `/logs` to
//! observe progress.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use tracing::info;

use crate::agents::{DeviceClass, UserAgentGenerator};
use crate::bot::{SessionRunner, SessionStatus, Step};
use crate::proxy::ProxyConfig;
use crate::registry::SessionHandle;
use crate::store::{now_iso, Profile, Session};
use crate::AppState;

/// JSON failure response in the `{success, message}` envelope.
fn failure(status: StatusCode, msg: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "message": msg.into() })),
    )
        .into_response()
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/create_session", post(create_session))
        .route("/sessions", get(get_sessions))
        .route("/stop_session/:session_id", post(stop_session))
        .route("/create_profile", post(create_profile))
        .route("/profiles", get(get_profiles))
        .route("/delete_profile/:profile_id", delete(delete_profile))
        .route("/logs", get(get_logs))
        .route("/clear_logs", delete(clear_logs))
        .route("/health", get(health_check))
        .layer(Extension(state))
}

fn validate_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid target_url: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported URL scheme: {}", other)),
    }
}

// ========== Session Handlers ==========

async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    Json(data): Json<serde_json::Value>,
) -> Response {
    for field in ["profile_type", "profile_count", "target_url"] {
        if data.get(field).is_none() {
            return failure(StatusCode::BAD_REQUEST, format!("Missing required field: {}", field));
        }
    }

    let target_url = match data["target_url"].as_str() {
        Some(u) => u.to_string(),
        None => return failure(StatusCode::BAD_REQUEST, "target_url must be a string"),
    };
    if let Err(msg) = validate_url(&target_url) {
        return failure(StatusCode::BAD_REQUEST, msg);
    }

    if !state.launcher.available() {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Browser automation is not available on this host",
        );
    }

    // Soft admission check: count-and-compare against the persisted
    // collection, no reservation. A burst of concurrent requests can
    // briefly exceed the ceiling.
    let config = state.store.config();
    let active = state
        .store
        .sessions()
        .iter()
        .filter(|s| matches!(s.status, SessionStatus::Starting | SessionStatus::Running))
        .count();
    if active >= config.max_sessions {
        return failure(
            StatusCode::BAD_REQUEST,
            format!("Maximum sessions limit reached ({})", config.max_sessions),
        );
    }

    let profile_type = data["profile_type"].as_str().unwrap_or("desktop").to_string();
    let device = DeviceClass::from_profile_type(&profile_type);
    let user_agent = UserAgentGenerator::generate(device).to_string();

    let proxy_config = resolve_proxy(&state, &data);

    let (session_id, profile_name) = state.store.update_sessions(|doc| {
        doc.session_counter += 1;
        let session_id = format!("sess_{:03}", doc.session_counter);
        let profile_name = format!("{}_profile_{}", profile_type, doc.session_counter);

        doc.sessions.push(Session {
            session_id: session_id.clone(),
            profile_name: profile_name.clone(),
            // Wire compat: this field carries the device class string.
            user_agent: profile_type.clone(),
            proxy_config: proxy_config.clone(),
            target_url: target_url.clone(),
            status: SessionStatus::Running,
            current_step: Step::Initializing,
            start_time: now_iso(),
            progress: 0,
        });

        (session_id, profile_name)
    });

    let handle = SessionHandle::new();
    state.registry.insert(&session_id, handle.clone()).await;

    info!("Creating session {} for {}", session_id, target_url);

    SessionRunner {
        session_id: session_id.clone(),
        profile_name,
        device,
        user_agent,
        target_url,
        proxy: proxy_config,
        headless: state.headless,
        auto_clear_cache: config.default_settings.auto_clear_cache,
        nav_timeout: state.nav_timeout,
        pacing: state.pacing.clone(),
        store: state.store.clone(),
        launcher: state.launcher.clone(),
        registry: state.registry.clone(),
        handle,
    }
    .spawn();

    Json(serde_json::json!({
        "success": true,
        "session_id": session_id,
        "message": "Session started successfully"
    }))
    .into_response()
}

/// Explicit proxy fields win; otherwise fall back to a random validated
/// proxy from the pool. `direct` (or absent) means no proxy.
fn resolve_proxy(state: &AppState, data: &serde_json::Value) -> Option<ProxyConfig> {
    let kind = data.get("proxy_type").and_then(|v| v.as_str())?;
    if kind == "direct" {
        return None;
    }

    if let Some(host) = data.get("proxy_host").and_then(|v| v.as_str()) {
        let port = data
            .get("proxy_port")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(8080) as u16;
        return Some(ProxyConfig {
            kind: kind.to_string(),
            host: host.to_string(),
            port,
            username: data.get("proxy_username").and_then(|v| v.as_str()).map(String::from),
            password: data.get("proxy_password").and_then(|v| v.as_str()).map(String::from),
        });
    }

    state.proxy_manager.random_valid()
}

async fn get_sessions(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.sessions())
}

async fn stop_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping session {}", session_id);

    if let Some(handle) = state.registry.remove(&session_id).await {
        handle.stop();
        // Don't wait for the pipeline's own cleanup: kill the browser now
        // in case it is blocked mid-navigation. Double-release is safe.
        handle.force_close().await;
    }

    state.store.update_session(&session_id, |s| {
        if !s.status.is_terminal() {
            s.status = SessionStatus::Stopped;
            s.current_step = Step::Stopped;
            s.progress = 100;
        }
    });

    Json(serde_json::json!({ "success": true, "message": "Session stopped successfully" }))
}

// ========== Profile Handlers ==========

async fn create_profile(
    Extension(state): Extension<Arc<AppState>>,
    Json(data): Json<serde_json::Value>,
) -> Response {
    for field in ["profile_name", "profile_type"] {
        if data.get(field).is_none() {
            return failure(StatusCode::BAD_REQUEST, format!("Missing required field: {}", field));
        }
    }

    let profile_type = data["profile_type"].as_str().unwrap_or("desktop").to_string();
    let user_agent = data
        .get("custom_user_agent")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| {
            UserAgentGenerator::generate(DeviceClass::from_profile_type(&profile_type)).to_string()
        });

    let profile_id = state.store.update_profiles(|doc| {
        let profile_id = format!("profile_{:03}", doc.profiles.len() + 1);
        doc.profiles.push(Profile {
            profile_id: profile_id.clone(),
            profile_name: data["profile_name"].as_str().unwrap_or_default().to_string(),
            profile_type,
            user_agent,
            proxy_settings: serde_json::json!({}),
            created_at: now_iso(),
            last_used: None,
        });
        profile_id
    });

    Json(serde_json::json!({
        "success": true,
        "profile_id": profile_id,
        "message": "Profile created successfully"
    }))
    .into_response()
}

async fn get_profiles(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.profiles())
}

async fn delete_profile(
    Extension(state): Extension<Arc<AppState>>,
    Path(profile_id): Path<String>,
) -> impl IntoResponse {
    state.store.update_profiles(|doc| {
        doc.profiles.retain(|p| p.profile_id != profile_id);
    });

    Json(serde_json::json!({ "success": true, "message": "Profile deleted successfully" }))
}

// ========== Log Handlers ==========

async fn get_logs(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.recent_logs(50))
}

async fn clear_logs(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    state.store.clear_logs();
    Json(serde_json::json!({ "success": true, "message": "Logs cleared successfully" }))
}

// ========== Health ==========

async fn health_check(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": now_iso(),
        "active_sessions": state.registry.active_count().await,
        "chrome_available": state.launcher.available(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::bot::{LogStatus, Pacing};
    use crate::browser::fake::{FakeDriver, FakeLauncher};
    use crate::browser::Launcher;
    use crate::proxy::ProxyManager;
    use crate::registry::SessionRegistry;
    use crate::store::JsonStore;
    use crate::web::build_router;

    fn test_state(dir: &std::path::Path, launcher: Arc<dyn Launcher>, pacing: Pacing) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(JsonStore::new(dir)),
            registry: Arc::new(SessionRegistry::new()),
            launcher,
            proxy_manager: Arc::new(ProxyManager::new()),
            headless: true,
            pacing,
            nav_timeout: Duration::from_secs(5),
        })
    }

    async fn request(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn wait_for_terminal(store: &JsonStore, session_id: &str) -> Session {
        for _ in 0..200 {
            if let Some(s) = store.sessions().into_iter().find(|s| s.session_id == session_id) {
                if s.status.is_terminal() {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} never reached a terminal status", session_id);
    }

    #[tokio::test]
    async fn created_session_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new().with_elements(".post a", 6));
        let state = test_state(dir.path(), Arc::new(FakeLauncher::new(driver)), Pacing::rapid());
        let app = build_router(state.clone());

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({
                "profile_type": "desktop",
                "profile_count": 1,
                "target_url": "https://example.com"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["session_id"], "sess_001");

        let session = wait_for_terminal(&state.store, "sess_001").await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
        assert_eq!(session.user_agent, "desktop");

        let logs = state.store.all_logs();
        assert!(logs.iter().any(|l| l.step == Step::OpeningUrl && l.status == LogStatus::Success));

        // The logs endpoint serves the tail of the collection.
        let (status, body) = request(&app, "GET", "/api/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn immediate_stop_yields_stopped_session() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new());
        // Long leak-probe settle keeps the pipeline busy while we stop it.
        let mut pacing = Pacing::rapid();
        pacing.leak_settle = Duration::from_millis(500);
        let state = test_state(dir.path(), Arc::new(FakeLauncher::new(driver)), pacing);
        let app = build_router(state.clone());

        let (_, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({
                "profile_type": "mobile",
                "profile_count": 1,
                "target_url": "https://example.com"
            })),
        )
        .await;
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = request(&app, "POST", &format!("/api/stop_session/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let session = wait_for_terminal(&state.store, &session_id).await;
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(session.progress, 100);

        // Stopping again is harmless.
        let (status, _) = request(&app, "POST", &format!("/api/stop_session/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_target_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state.clone());

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({ "profile_type": "desktop", "profile_count": 1 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Missing required field: target_url");
        assert!(state.store.sessions().is_empty());
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state.clone());

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({
                "profile_type": "desktop",
                "profile_count": 1,
                "target_url": "not a url"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(state.store.sessions().is_empty());
    }

    #[tokio::test]
    async fn session_limit_is_enforced_at_admission() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state.clone());

        // Fill the collection with active sessions up to the default ceiling.
        let max = state.store.config().max_sessions;
        state.store.update_sessions(|doc| {
            for i in 0..max {
                doc.session_counter += 1;
                doc.sessions.push(Session {
                    session_id: format!("sess_{:03}", i + 1),
                    profile_name: format!("desktop_profile_{}", i + 1),
                    user_agent: "desktop".to_string(),
                    proxy_config: None,
                    target_url: "https://example.com".to_string(),
                    status: SessionStatus::Running,
                    current_step: Step::Scrolling,
                    start_time: now_iso(),
                    progress: 50,
                });
            }
        });

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({
                "profile_type": "desktop",
                "profile_count": 1,
                "target_url": "https://example.com"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("limit"));
        assert_eq!(state.store.sessions().len(), max);
    }

    #[tokio::test]
    async fn profile_crud_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state.clone());

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_profile",
            Some(serde_json::json!({ "profile_name": "shop visitor", "profile_type": "mobile" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile_id"], "profile_001");

        let (_, profiles) = request(&app, "GET", "/api/profiles", None).await;
        let profiles = profiles.as_array().unwrap().clone();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["profile_name"], "shop visitor");
        assert_eq!(profiles[0]["profile_type"], "mobile");
        assert!(!profiles[0]["user_agent"].as_str().unwrap().is_empty());

        let (status, _) = request(&app, "DELETE", "/api/delete_profile/profile_001", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, profiles) = request(&app, "GET", "/api/profiles", None).await;
        assert!(profiles.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_creation_requires_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state);

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_profile",
            Some(serde_json::json!({ "profile_name": "incomplete" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing required field: profile_type");
    }

    #[tokio::test]
    async fn clear_logs_truncates_collection() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            dir.path(),
            Arc::new(FakeLauncher::new(Arc::new(FakeDriver::new()))),
            Pacing::rapid(),
        );
        let app = build_router(state.clone());

        state.store.append_log(crate::store::LogEntry::new(
            "sess_001",
            Step::Scrolling,
            LogStatus::Success,
            "pass",
            None,
        ));

        let (status, body) = request(&app, "DELETE", "/api/clear_logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(state.store.all_logs().is_empty());
    }

    #[tokio::test]
    async fn health_reports_browser_availability() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeLauncher::failing()), Pacing::rapid());
        let app = build_router(state);

        let (status, body) = request(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["chrome_available"], false);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn unavailable_browser_rejects_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeLauncher::failing()), Pacing::rapid());
        let app = build_router(state.clone());

        let (status, body) = request(
            &app,
            "POST",
            "/api/create_session",
            Some(serde_json::json!({
                "profile_type": "desktop",
                "profile_count": 1,
                "target_url": "https://example.com"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(state.store.sessions().is_empty());
    }
}
