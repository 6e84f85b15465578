//! Command dispatch, sequencing, and timeout tracking
//!
//! This module handles:
//! - Assigning per-target sequence numbers and FIFO ordering for
//!   sequence-bound commands
//! - Correlating answers back to blocked callers
//! - Re-issuing recurring commands per target
//! - Best-effort cancellation of overdue commands

mod channel;
mod cron;
mod supervisor;

pub use channel::{DispatchChannel, DispatchError};
pub use cron::{CronError, CronScheduler};
pub use supervisor::TimeoutSupervisor;

use async_trait::async_trait;
use corral_shared::Envelope;

/// Transport seam the dispatch channel sends through.
///
/// The production implementation is the session manager; tests substitute
/// recording or echoing fakes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn transmit(&self, target_id: &str, envelope: &Envelope) -> anyhow::Result<()>;
}
