//! Server configuration

use corral_shared::{defaults, now_ms};
use std::time::Duration;

/// Configuration for the management server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the agent listener binds to
    pub bind_addr: String,
    /// Interval between supervisor deadline scans
    pub supervisor_tick: Duration,
    /// Seed for the cron scheduler's jitter source
    pub jitter_seed: u64,
    /// Interval for the recurring ping command registered per target
    pub ping_interval_secs: u64,
    /// Interval for the recurring network-rule cleanup command
    pub cleanup_interval_secs: u64,
    /// Age threshold passed to the cleanup command
    pub rule_max_age_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8250".into(),
            supervisor_tick: Duration::from_millis(defaults::SUPERVISOR_TICK_MS),
            jitter_seed: now_ms(),
            ping_interval_secs: defaults::PING_INTERVAL_SECS,
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL_SECS,
            rule_max_age_secs: 2 * defaults::CLEANUP_INTERVAL_SECS,
        }
    }
}
