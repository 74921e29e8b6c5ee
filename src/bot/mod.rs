//! Session pipeline
//!
//! One `SessionRunner` owns one browser-backed session end to end and
//! records every phase transition as a log entry plus a session update.

mod runner;
mod steps;

pub use runner::{Pacing, SessionRunner, AD_SELECTORS, POST_SELECTORS};
pub use steps::{LogStatus, PhaseOutcome, SessionStatus, Step};
