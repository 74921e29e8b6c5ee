//! Proxy configuration and validation
//!
//! Sessions can run through an upstream HTTP/SOCKS proxy. A proxy is
//! validated by making one test HTTP request through it; the manager keeps
//! the ones that survive and can hand out a random survivor when a request
//! asks for a pooled proxy instead of supplying explicit credentials.

use std::path::Path;
use std::time::Duration;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{info, warn};

/// Endpoint used for one-shot proxy validation.
const VALIDATE_URL: &str = "http://httpbin.org/ip";

/// Upstream proxy credentials for one session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProxyConfig {
    /// Proxy kind as supplied by the client ("http", "socks5", ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// `host:port` form passed to Chrome's `--proxy-server`.
    pub fn server_arg(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full proxy URL for HTTP clients. SOCKS kinds keep their scheme,
    /// everything else goes through plain HTTP.
    pub fn url(&self) -> String {
        let scheme = match self.kind.as_str() {
            "socks5" | "socks5h" => "socks5",
            _ => "http",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Validate this proxy by routing one request through it.
    pub async fn validate(&self, timeout: Duration) -> bool {
        let mut proxy = match reqwest::Proxy::all(self.url()) {
            Ok(p) => p,
            Err(e) => {
                warn!("Invalid proxy URL {}: {}", self.server_arg(), e);
                return false;
            }
        };

        if let (Some(user), Some(pass)) = (self.username.as_deref(), self.password.as_deref()) {
            proxy = proxy.basic_auth(user, pass);
        }

        let client = match reqwest::Client::builder().proxy(proxy).timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to build proxy test client: {}", e);
                return false;
            }
        };

        match client.get(VALIDATE_URL).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("Proxy {} failed validation: {}", self.server_arg(), e);
                false
            }
        }
    }
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct ProxiesDoc {
    #[serde(default)]
    proxies: Vec<ProxyConfig>,
}

#[derive(Default)]
struct ProxyManagerInner {
    proxies: Vec<ProxyConfig>,
    valid: Vec<ProxyConfig>,
}

/// Optional pool of proxy credentials shared by all sessions.
pub struct ProxyManager {
    inner: RwLock<ProxyManagerInner>,
}

impl ProxyManager {
    pub fn new() -> Self {
        Self { inner: RwLock::new(ProxyManagerInner::default()) }
    }

    /// Load the pool from a `{"proxies": [...]}` JSON file. Missing or
    /// unparseable files leave the pool empty.
    pub fn load_from_file(path: &Path) -> Self {
        let manager = Self::new();

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<ProxiesDoc>(&content) {
                Ok(doc) => {
                    info!("Loaded {} proxies from {:?}", doc.proxies.len(), path);
                    manager.inner.write().proxies = doc.proxies;
                }
                Err(e) => warn!("Failed to parse proxy file {:?}: {}", path, e),
            },
            Err(_) => {}
        }

        manager
    }

    pub fn add_proxy(&self, proxy: ProxyConfig) {
        self.inner.write().proxies.push(proxy);
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.read().proxies.len()
    }

    pub fn valid_count(&self) -> usize {
        self.inner.read().valid.len()
    }

    /// Test every configured proxy and keep the ones that respond.
    /// Returns the number of survivors.
    pub async fn validate_all(&self, timeout: Duration) -> usize {
        let proxies = self.inner.read().proxies.clone();
        let mut valid = Vec::new();

        for proxy in proxies {
            if proxy.validate(timeout).await {
                valid.push(proxy);
            }
        }

        let count = valid.len();
        self.inner.write().valid = valid;
        info!("Proxy validation complete: {}/{} usable", count, self.proxy_count());
        count
    }

    /// Random pick from the validated pool.
    pub fn random_valid(&self) -> Option<ProxyConfig> {
        let inner = self.inner.read();
        let mut rng = rand::thread_rng();
        inner.valid.choose(&mut rng).cloned()
    }
}

impl Default for ProxyManager {
    fn default() -> Self {
        Self::new()
    }
}
