//! Browser automation module
//!
//! Chrome/Chromium control behind a driver trait so the session pipeline
//! stays testable without a browser binary on the host.

mod chrome;
mod driver;
mod errors;
#[cfg(test)]
pub mod fake;

pub use chrome::{find_chrome, ChromeDriver, ChromeLauncher};
pub use driver::{Driver, ElementHandle, LaunchProfile, Launcher};
pub use errors::BrowserError;
