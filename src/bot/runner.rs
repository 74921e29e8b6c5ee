//! Session runner
//!
//! Drives one session through the fixed step pipeline: launch browser,
//! leak probe, navigate, scroll, dismiss ads, click a post, return to top,
//! clear cookies. Every phase funnels through `log_step`, which appends a
//! log entry and projects step/status/progress onto the session record.
//! Cleanup always runs, and the terminal status is written exactly once.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use super::steps::{LogStatus, PhaseOutcome, SessionStatus, Step};
use crate::agents::DeviceClass;
use crate::browser::{Driver, LaunchProfile, Launcher};
use crate::proxy::ProxyConfig;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::store::{JsonStore, LogEntry};

/// Close/dismiss controls probed during the ad-dismissal phase.
pub const AD_SELECTORS: &[&str] = &[
    "button[aria-label*='close' i]",
    "button[class*='close' i]",
    "div[class*='ad' i] button",
    ".ad-close",
    ".close-button",
    "[aria-label*='tutup' i]",
    "[class*='dismiss' i]",
];

/// Candidate links for the random-engagement phase.
pub const POST_SELECTORS: &[&str] = &[
    "a[href*='/p/']",
    "a[href*='/post/']",
    "a[href*='/article/']",
    ".post a",
    ".article a",
    ".card a",
    ".content a",
    "a:not([href*='#']):not([href*='facebook']):not([href*='twitter']):not([href*='instagram'])",
];

const LEAK_PROBE_URLS: &[&str] = &["https://httpbin.org/ip", "https://api.ipify.org?format=json"];

/// All deliberate delays in the pipeline. Tests swap in `rapid()` so
/// scenario runs finish in milliseconds.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub scroll_increments: Vec<f64>,
    pub scroll_pauses: Vec<Duration>,
    pub back_scroll_px: (f64, f64),
    pub back_scroll_pause: (Duration, Duration),
    pub top_pause: (Duration, Duration),
    pub page_settle: (Duration, Duration),
    pub leak_settle: Duration,
    pub ad_click_delay: (Duration, Duration),
    pub ad_after_click: Duration,
    pub pre_click_pause: (Duration, Duration),
    pub post_click_settle: (Duration, Duration),
    pub engaged_settle: (Duration, Duration),
    pub back_nav_settle: (Duration, Duration),
    pub return_top_pause: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            scroll_increments: vec![100.0, 150.0, 200.0, 250.0, 300.0],
            scroll_pauses: vec![
                Duration::from_millis(500),
                Duration::from_millis(800),
                Duration::from_millis(1200),
                Duration::from_millis(1500),
                Duration::from_millis(2000),
            ],
            back_scroll_px: (50.0, 150.0),
            back_scroll_pause: (Duration::from_millis(500), Duration::from_millis(1500)),
            top_pause: (Duration::from_secs(1), Duration::from_secs(3)),
            page_settle: (Duration::from_secs(3), Duration::from_secs(5)),
            leak_settle: Duration::from_secs(2),
            ad_click_delay: (Duration::from_millis(500), Duration::from_millis(1500)),
            ad_after_click: Duration::from_secs(1),
            pre_click_pause: (Duration::from_secs(1), Duration::from_secs(2)),
            post_click_settle: (Duration::from_secs(3), Duration::from_secs(5)),
            engaged_settle: (Duration::from_secs(2), Duration::from_secs(4)),
            back_nav_settle: (Duration::from_secs(2), Duration::from_secs(3)),
            return_top_pause: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// Near-zero delays with big scroll strides.
    pub fn rapid() -> Self {
        let zero = (Duration::ZERO, Duration::ZERO);
        Self {
            scroll_increments: vec![800.0],
            scroll_pauses: vec![Duration::ZERO],
            back_scroll_px: (50.0, 150.0),
            back_scroll_pause: zero,
            top_pause: zero,
            page_settle: zero,
            leak_settle: Duration::ZERO,
            ad_click_delay: zero,
            ad_after_click: Duration::ZERO,
            pre_click_pause: zero,
            post_click_settle: zero,
            engaged_settle: zero,
            back_nav_settle: zero,
            return_top_pause: Duration::ZERO,
        }
    }
}

fn pick_pause(rng: &mut StdRng, range: (Duration, Duration)) -> Duration {
    if range.1 <= range.0 {
        return range.0;
    }
    let span = (range.1 - range.0).as_millis() as u64;
    range.0 + Duration::from_millis(rng.gen_range(0..=span))
}

/// Owns one session from launch to terminal status.
pub struct SessionRunner {
    pub session_id: String,
    pub profile_name: String,
    pub device: DeviceClass,
    pub user_agent: String,
    pub target_url: String,
    pub proxy: Option<ProxyConfig>,
    pub headless: bool,
    pub auto_clear_cache: bool,
    pub nav_timeout: Duration,
    pub pacing: Pacing,
    pub store: Arc<JsonStore>,
    pub launcher: Arc<dyn Launcher>,
    pub registry: Arc<SessionRegistry>,
    pub handle: SessionHandle,
}

impl SessionRunner {
    /// Spawn the pipeline as a background task. A panic inside the
    /// pipeline still closes the browser and writes a terminal status.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let session_id = self.session_id.clone();
        let store = self.store.clone();
        let registry = self.registry.clone();
        let handle = self.handle.clone();

        tokio::spawn(async move {
            use futures::FutureExt;
            let result = std::panic::AssertUnwindSafe(self.run());

            if let Err(panic_info) = result.catch_unwind().await {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };

                error!("Session {} panicked: {}. Cleaning up.", session_id, panic_msg);

                store.append_log(LogEntry::new(
                    &session_id,
                    Step::Error,
                    LogStatus::Failed,
                    format!("Session failed: {}", panic_msg),
                    None,
                ));

                handle.force_close().await;
                registry.remove(&session_id).await;
                store.update_session(&session_id, |s| {
                    if !s.status.is_terminal() {
                        s.status = SessionStatus::Failed;
                        s.progress = 100;
                    }
                });
            }
        })
    }

    /// Run the pipeline to completion or early abort.
    pub async fn run(self) {
        self.log_step(
            Step::Initializing,
            LogStatus::Running,
            "Session started",
            Some(serde_json::json!({
                "profile": self.profile_name,
                "device": self.device.as_str(),
                "target_url": self.target_url,
                "proxy": self.proxy,
            })),
        );

        let mut fatal: Option<String> = None;
        let mut driver: Option<Arc<dyn Driver>> = None;

        if self.handle.is_running() {
            let (width, height) = self.device.viewport();
            let profile = LaunchProfile {
                session_id: self.session_id.clone(),
                user_agent: self.user_agent.clone(),
                window_width: width,
                window_height: height,
                headless: self.headless,
                proxy: self.proxy.clone(),
            };

            match self.launcher.launch(&profile).await {
                Ok(d) => {
                    self.handle.set_driver(d.clone()).await;
                    driver = Some(d);
                    self.log_step(Step::SetupDriver, LogStatus::Success, "Browser setup completed", None);
                }
                Err(e) => {
                    self.log_step(
                        Step::SetupDriver,
                        LogStatus::Error,
                        format!("Failed to setup driver: {}", e),
                        None,
                    );
                    self.log_step(Step::SetupDriver, LogStatus::Failed, "Driver setup failed", None);
                    fatal = Some(e.to_string());
                }
            }
        }

        if let Some(ref d) = driver {
            if fatal.is_none() && self.handle.is_running() {
                self.check_data_leak(d.as_ref()).await;
            }

            if fatal.is_none() && self.handle.is_running() {
                if let PhaseOutcome::Fatal(msg) = self.open_target(d.as_ref()).await {
                    fatal = Some(msg);
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                match self.human_scroll(d.as_ref(), 2).await {
                    PhaseOutcome::NonFatal(msg) => {
                        self.log_step(Step::Scrolling, LogStatus::Error, format!("Scrolling error: {}", msg), None);
                    }
                    _ => {
                        self.log_step(Step::Scrolling, LogStatus::Success, "Initial scrolling completed", None);
                    }
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                self.skip_ads(d.as_ref()).await;
            }

            if fatal.is_none() && self.handle.is_running() {
                let clicked = self.click_random_post(d.as_ref()).await;
                if clicked && self.handle.is_running() {
                    // Engage with the clicked-through page, then come back.
                    let _ = self.human_scroll(d.as_ref(), 2).await;
                    self.pause(self.pacing.engaged_settle).await;

                    if self.handle.is_running() {
                        match d.go_back().await {
                            Ok(()) => {
                                self.log_step(Step::Navigation, LogStatus::Success, "Returned to original page", None);
                            }
                            Err(e) => {
                                self.log_step(Step::Navigation, LogStatus::Error, format!("Back navigation failed: {}", e), None);
                            }
                        }
                        self.pause(self.pacing.back_nav_settle).await;
                    }
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                match self.human_scroll(d.as_ref(), 1).await {
                    PhaseOutcome::NonFatal(msg) => {
                        self.log_step(Step::Scrolling, LogStatus::Error, format!("Scrolling error: {}", msg), None);
                    }
                    _ => {
                        self.log_step(Step::Scrolling, LogStatus::Success, "Final scrolling completed", None);
                    }
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                match d.evaluate("window.scrollTo({top: 0, behavior: 'smooth'});").await {
                    Ok(_) => {
                        tokio::time::sleep(self.pacing.return_top_pause).await;
                        self.log_step(Step::ReturningHome, LogStatus::Success, "Returned to top of page", None);
                    }
                    Err(e) => {
                        self.log_step(Step::ReturningHome, LogStatus::Error, format!("Return to top failed: {}", e), None);
                    }
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                if self.auto_clear_cache {
                    self.clear_cache(d.as_ref()).await;
                } else {
                    self.log_step(Step::ClearingCache, LogStatus::Skipped, "Auto cache clear disabled", None);
                }
            }

            if fatal.is_none() && self.handle.is_running() {
                self.log_step(Step::Completed, LogStatus::Success, "Session completed successfully", None);
            }
        }

        self.finish(fatal).await;
    }

    /// Release the browser, drop the registry entry, and write the terminal
    /// status. Terminal progress is always reported as 100, even for
    /// stopped and failed sessions.
    async fn finish(&self, fatal: Option<String>) {
        if let Some(driver) = self.handle.take_driver().await {
            driver.close().await;
        }
        self.registry.remove(&self.session_id).await;

        let stopped = !self.handle.is_running();
        self.store.update_session(&self.session_id, |s| {
            if s.status.is_terminal() {
                return;
            }
            s.status = if stopped {
                s.current_step = Step::Stopped;
                SessionStatus::Stopped
            } else if fatal.is_some() {
                SessionStatus::Failed
            } else {
                SessionStatus::Completed
            };
            s.progress = 100;
        });

        info!("Session {} finished (stopped: {}, fatal: {:?})", self.session_id, stopped, fatal);
    }

    /// Append a log entry, then project step/status/progress onto the
    /// session record. Terminal records are never touched.
    fn log_step(&self, step: Step, status: LogStatus, message: impl Into<String>, details: Option<serde_json::Value>) {
        let entry = LogEntry::new(&self.session_id, step, status, message, details);
        self.store.append_log(entry);

        self.store.update_session(&self.session_id, |s| {
            if !s.status.is_terminal() {
                s.current_step = step;
                s.status = SessionStatus::Running;
                s.progress = step.progress();
            }
        });
    }

    async fn pause(&self, range: (Duration, Duration)) {
        let mut rng = StdRng::from_entropy();
        tokio::time::sleep(pick_pause(&mut rng, range)).await;
    }

    /// Best-effort egress check: fetch "what is my IP" pages through the
    /// browser so the proxy path is the one observed.
    async fn check_data_leak(&self, driver: &dyn Driver) {
        let result = async {
            for url in LEAK_PROBE_URLS {
                if !self.handle.is_running() {
                    break;
                }
                driver.navigate(url, self.nav_timeout).await?;
                tokio::time::sleep(self.pacing.leak_settle).await;
            }
            driver.evaluate("document.body.innerText").await
        }
        .await;

        match result {
            Ok(value) => {
                let body = value.as_str().unwrap_or_default().to_string();
                let shown: String = body.chars().take(100).collect();
                self.log_step(
                    Step::DataLeakCheck,
                    LogStatus::Success,
                    format!("IP Check completed: {}...", shown),
                    None,
                );
            }
            Err(e) => {
                self.log_step(
                    Step::DataLeakCheck,
                    LogStatus::Error,
                    format!("Data leak check failed: {}", e),
                    None,
                );
            }
        }
    }

    async fn open_target(&self, driver: &dyn Driver) -> PhaseOutcome {
        match driver.navigate(&self.target_url, self.nav_timeout).await {
            Ok(()) => {
                self.log_step(
                    Step::OpeningUrl,
                    LogStatus::Success,
                    format!("Opened URL: {}", self.target_url),
                    None,
                );
                self.pause(self.pacing.page_settle).await;
                PhaseOutcome::Ok
            }
            Err(e) => {
                self.log_step(
                    Step::OpeningUrl,
                    LogStatus::Error,
                    format!("Failed to open URL: {}", e),
                    None,
                );
                PhaseOutcome::Fatal(e.to_string())
            }
        }
    }

    /// Gradual scroll toward the bottom with random strides and pauses,
    /// an occasional short back-scroll, and an occasional smooth return
    /// to the top. Checks the running flag before every sub-action.
    async fn human_scroll(&self, driver: &dyn Driver, passes: u32) -> PhaseOutcome {
        let mut rng = StdRng::from_entropy();

        for _ in 0..passes {
            if !self.handle.is_running() {
                break;
            }

            let height = match driver.evaluate("document.body.scrollHeight").await {
                Ok(v) => v.as_f64().unwrap_or(1000.0),
                Err(e) => return PhaseOutcome::NonFatal(e.to_string()),
            };

            let mut position = 0.0;
            while position < height && self.handle.is_running() {
                let increment = self
                    .pacing
                    .scroll_increments
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(200.0);
                position += increment;

                if let Err(e) = driver.evaluate(&format!("window.scrollTo(0, {});", position)).await {
                    return PhaseOutcome::NonFatal(e.to_string());
                }

                let pause = self
                    .pacing
                    .scroll_pauses
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(Duration::from_millis(800));
                tokio::time::sleep(pause).await;

                if rng.gen_bool(0.2) {
                    let (lo, hi) = self.pacing.back_scroll_px;
                    position -= rng.gen_range(lo..=hi);
                    if let Err(e) = driver.evaluate(&format!("window.scrollTo(0, {});", position)).await {
                        return PhaseOutcome::NonFatal(e.to_string());
                    }
                    self.pause(self.pacing.back_scroll_pause).await;
                }
            }

            if rng.gen_bool(0.3) && self.handle.is_running() {
                if let Err(e) = driver.evaluate("window.scrollTo({top: 0, behavior: 'smooth'});").await {
                    return PhaseOutcome::NonFatal(e.to_string());
                }
                self.pause(self.pacing.top_pause).await;
            }
        }

        PhaseOutcome::Ok
    }

    /// Click every visible close/dismiss control. No matches is a skip,
    /// not an error.
    async fn skip_ads(&self, driver: &dyn Driver) {
        let mut ads_skipped = 0u32;

        for selector in AD_SELECTORS {
            if !self.handle.is_running() {
                break;
            }

            let elements = match driver.find_visible(selector).await {
                Ok(els) => els,
                Err(_) => continue,
            };

            for element in elements {
                if !self.handle.is_running() {
                    break;
                }

                self.pause(self.pacing.ad_click_delay).await;
                if driver.click(&element).await.is_ok() {
                    ads_skipped += 1;
                    self.log_step(
                        Step::SkippingAds,
                        LogStatus::Success,
                        format!("Skipped ad #{}", ads_skipped),
                        None,
                    );
                    tokio::time::sleep(self.pacing.ad_after_click).await;
                }
            }
        }

        if ads_skipped > 0 {
            self.log_step(
                Step::SkippingAds,
                LogStatus::Success,
                format!("Total ads skipped: {}", ads_skipped),
                None,
            );
        } else {
            self.log_step(Step::SkippingAds, LogStatus::Skipped, "No ads found to skip", None);
        }
    }

    /// Pick one link at random from the visible candidates, skipping the
    /// first two (presumed navigation chrome), and click it. Returns
    /// whether a click happened.
    async fn click_random_post(&self, driver: &dyn Driver) -> bool {
        let mut candidates = Vec::new();

        for selector in POST_SELECTORS {
            if !self.handle.is_running() {
                break;
            }
            if let Ok(elements) = driver.find_visible(selector).await {
                for element in elements {
                    if !candidates.contains(&element) {
                        candidates.push(element);
                    }
                }
            }
        }

        if candidates.len() > 3 {
            let upper = candidates.len().min(8);
            let mut rng = StdRng::from_entropy();
            let index = rng.gen_range(2..upper);
            let element = candidates[index].clone();

            if let Err(e) = driver.scroll_into_view(&element).await {
                warn!("Session {} scroll into view failed: {}", self.session_id, e);
            }
            self.pause(self.pacing.pre_click_pause).await;

            match driver.click(&element).await {
                Ok(()) => {
                    self.log_step(Step::ClickingPost, LogStatus::Success, "Clicked on random post", None);
                    self.pause(self.pacing.post_click_settle).await;
                    return true;
                }
                Err(e) => {
                    self.log_step(
                        Step::ClickingPost,
                        LogStatus::Error,
                        format!("Clicking post failed: {}", e),
                        None,
                    );
                    return false;
                }
            }
        }

        self.log_step(Step::ClickingPost, LogStatus::Skipped, "No suitable posts found to click", None);
        false
    }

    /// Clear cookies plus local/session storage and indexedDB.
    async fn clear_cache(&self, driver: &dyn Driver) {
        let result = async {
            driver.clear_cookies().await?;
            driver.evaluate("window.localStorage.clear();").await?;
            driver.evaluate("window.sessionStorage.clear();").await?;
            driver
                .evaluate(
                    r#"try {
                        indexedDB.databases().then(function(databases) {
                            databases.forEach(function(db) { indexedDB.deleteDatabase(db.name); });
                        });
                    } catch(e) {}"#,
                )
                .await
        }
        .await;

        match result {
            Ok(_) => {
                self.log_step(
                    Step::ClearingCache,
                    LogStatus::Success,
                    "Cache, cookies and storage cleared",
                    None,
                );
            }
            Err(e) => {
                self.log_step(
                    Step::ClearingCache,
                    LogStatus::Error,
                    format!("Cache clearing failed: {}", e),
                    None,
                );
            }
        }
    }
}
