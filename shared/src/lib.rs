//! Corral Shared Protocol Types
//!
//! This crate provides the command/answer model, sequencing policy, and
//! wire codec shared by the corral management server and host agents.

pub mod codec;
pub mod command;
pub mod registry;
pub mod waiter_state;

use std::time::{SystemTime, UNIX_EPOCH};

pub use command::{
    Answer, AnswerFrame, AnswerPayload, Command, CommandFrame, CommandKind, CommandPayload,
    Envelope, StartupReport,
};
pub use registry::{default_sequence_bound, default_wait_secs, effective_wait_secs, is_sequence_bound};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol tuning parameters
pub mod defaults {
    /// Interval between supervisor deadline scans, in milliseconds
    pub const SUPERVISOR_TICK_MS: u64 = 1000;

    /// Default interval for the recurring ping command
    pub const PING_INTERVAL_SECS: u64 = 60;

    /// Default interval for the recurring network-rule cleanup command
    pub const CLEANUP_INTERVAL_SECS: u64 = 120;

    /// Wait budget applied when a command carries none and the registry
    /// has no tighter default for its kind
    pub const FALLBACK_WAIT_SECS: u64 = 30;
}
