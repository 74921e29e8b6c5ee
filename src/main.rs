use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use traffic_bot::web::start_server;
use traffic_bot::{init_logging, log_dir, AppState};

#[tokio::main]
async fn main() {
    let _guard = init_logging();

    info!("Starting Traffic Bot");
    if let Some(dir) = log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let state = Arc::new(AppState::new("data"));

    if !state.launcher.available() {
        warn!("No Chrome/Chromium binary found; session creation will fail until one is installed");
    }

    // Validate the proxy pool in the background so startup stays fast.
    if state.proxy_manager.proxy_count() > 0 {
        let proxy_manager = state.proxy_manager.clone();
        tokio::spawn(async move {
            proxy_manager.validate_all(Duration::from_secs(10)).await;
        });
    }

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5000);

    if let Err(e) = start_server(state, port).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
