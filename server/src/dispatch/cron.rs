//! Recurring command scheduler
//!
//! Re-issues registered recurring commands through the dispatch channel on
//! a fixed interval per target. Fires are ordinary submissions: they pass
//! through the sequencing policy and the channel like any caller's
//! command. The first fire of each job is offset by bounded random jitter
//! so a fleet of targets registering together does not fan out in
//! lockstep.

use super::channel::{DispatchChannel, DispatchError};
use corral_shared::{Command, CommandKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Rejections at registration time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("recurring command requires a positive repeat interval")]
    InvalidInterval,
}

/// One registered recurring command; the id distinguishes a job from a
/// later registration that replaced it under the same key
struct Job {
    id: u64,
    handle: JoinHandle<()>,
}

/// Drives recurring commands, one background job per (target, kind)
pub struct CronScheduler {
    channel: Arc<DispatchChannel>,
    jobs: Arc<Mutex<HashMap<(String, CommandKind), Job>>>,
    next_job_id: AtomicU64,
    /// Seeded jitter source; injected so tests are deterministic
    rng: Mutex<StdRng>,
}

impl CronScheduler {
    /// Create a new scheduler over the given channel with a jitter seed
    pub fn new(channel: Arc<DispatchChannel>, jitter_seed: u64) -> Self {
        Self {
            channel,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_job_id: AtomicU64::new(1),
            rng: Mutex::new(StdRng::seed_from_u64(jitter_seed)),
        }
    }

    /// Register a recurring command for a target.
    ///
    /// The command must carry a positive repeat interval. Registering the
    /// same (target, kind) again replaces the existing job.
    pub async fn register(&self, target_id: &str, command: Command) -> Result<(), CronError> {
        let interval_secs = command
            .repeat_interval_secs
            .filter(|secs| *secs > 0)
            .ok_or(CronError::InvalidInterval)?;
        let kind = command.kind();

        // Jitter applies to the first fire only, bounded by half the interval
        let jitter_ms = self
            .rng
            .lock()
            .await
            .random_range(0..=interval_secs * 500);

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let channel = self.channel.clone();
        let jobs_map = self.jobs.clone();
        let target = target_id.to_string();
        let key = (target_id.to_string(), kind);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs(interval_secs);
            sleep(interval + Duration::from_millis(jitter_ms)).await;

            loop {
                match channel.submit(&target, command.clone()).await {
                    Ok(answer) if answer.success => {
                        debug!(target = %target, kind = ?kind, "recurring command completed");
                    }
                    Ok(answer) => {
                        warn!(
                            target = %target,
                            kind = ?kind,
                            detail = ?answer.detail,
                            "recurring command reported failure"
                        );
                    }
                    Err(DispatchError::TargetUnavailable) => {
                        debug!(target = %target, kind = ?kind, "target gone; stopping recurring command");
                        // Drop our own registration, but never a newer job
                        // that already replaced it under the same key
                        let mut jobs = jobs_map.lock().await;
                        if jobs.get(&task_key).map(|job| job.id) == Some(job_id) {
                            jobs.remove(&task_key);
                        }
                        break;
                    }
                    Err(e) => {
                        // Timeouts and cancels never stop the schedule
                        warn!(target = %target, kind = ?kind, error = %e, "recurring command did not complete");
                    }
                }
                sleep(interval).await;
            }
        });

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(key, Job { id: job_id, handle }) {
            previous.handle.abort();
            debug!(target = %target_id, kind = ?kind, "replaced existing recurring command");
        }
        info!(target = %target_id, kind = ?kind, interval_secs, jitter_ms, "recurring command registered");
        Ok(())
    }

    /// Stop the recurring command of the given kind for a target.
    /// Returns whether a job was registered.
    pub async fn unregister(&self, target_id: &str, kind: CommandKind) -> bool {
        let removed = self
            .jobs
            .lock()
            .await
            .remove(&(target_id.to_string(), kind));
        match removed {
            Some(job) => {
                job.handle.abort();
                info!(target = %target_id, kind = ?kind, "recurring command unregistered");
                true
            }
            None => false,
        }
    }

    /// Stop every recurring command for a target (disconnect cleanup)
    pub async fn drop_target(&self, target_id: &str) {
        let mut jobs = self.jobs.lock().await;
        let keys: Vec<(String, CommandKind)> = jobs
            .keys()
            .filter(|(target, _)| target == target_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(job) = jobs.remove(&key) {
                job.handle.abort();
            }
        }
    }

    /// Number of registered jobs across all targets
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Number of registered jobs for one target
    pub async fn job_count_for(&self, target_id: &str) -> usize {
        self.jobs
            .lock()
            .await
            .keys()
            .filter(|(target, _)| target == target_id)
            .count()
    }
}
