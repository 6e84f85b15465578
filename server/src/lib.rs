//! Corral management server: agent command dispatch and sequencing core.
//!
//! The dispatch channel serializes sequence-bound commands per target,
//! correlates answers by (target, sequence), and bounds every caller's
//! wait. The cron scheduler re-issues recurring commands through the same
//! channel, and the timeout supervisor issues best-effort cancels for
//! overdue commands.

pub mod config;
pub mod dispatch;
pub mod session;
