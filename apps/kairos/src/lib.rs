//! # kairos (binary crate library)
//!
//! Exposes the API and CLI modules so integration tests can drive the
//! router without spawning a process.

pub mod api;
pub mod cli;
pub mod config;

use kairos_core::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
///
/// The core never reads a clock; the app layer stamps every mutation here.
#[must_use]
pub fn now_millis() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Timestamp(millis)
}
