//! User agent generation
//!
//! Picks a user agent string uniformly at random from a fixed list,
//! keyed by device class. Profiles without a custom user agent and new
//! sessions both draw from here.

use rand::seq::SliceRandom;

/// Device class for a browsing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Parse from the `profile_type` request field. Anything other than
    /// "mobile" is treated as desktop.
    pub fn from_profile_type(profile_type: &str) -> Self {
        if profile_type.eq_ignore_ascii_case("mobile") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    /// Browser window size for this device class (iPhone X for mobile).
    pub fn viewport(&self) -> (u32, u32) {
        match self {
            DeviceClass::Mobile => (375, 812),
            DeviceClass::Desktop => (1920, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Desktop => "desktop",
        }
    }
}

const MOBILE_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 12; SM-S901B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/99.0.4844.88 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPad; CPU OS 16_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.1 Mobile/15E148 Safari/604.1",
];

const DESKTOP_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/110.0",
];

/// Random user agent selection per device class.
pub struct UserAgentGenerator;

impl UserAgentGenerator {
    pub fn generate(device: DeviceClass) -> &'static str {
        let pool = match device {
            DeviceClass::Mobile => MOBILE_AGENTS,
            DeviceClass::Desktop => DESKTOP_AGENTS,
        };
        let mut rng = rand::thread_rng();
        pool.choose(&mut rng).copied().unwrap_or(DESKTOP_AGENTS[0])
    }
}
