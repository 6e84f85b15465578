//! Command executor - dispatches incoming commands to handlers

use super::handlers::{self, HandlerContext};
use corral_shared::{Answer, AnswerPayload, Command, CommandPayload};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Result of handler execution
#[derive(Debug, Clone)]
pub enum HandlerResult {
    /// Command executed successfully
    Completed {
        detail: String,
        payload: Option<AnswerPayload>,
    },
    /// Command executed but the operation failed
    Failed { detail: String },
}

/// Executes commands received from the management server
pub struct CommandExecutor {
    target_id: String,
    started_at: Instant,
    /// Running VMs simulated on this host
    vms: Arc<RwLock<HashSet<String>>>,
    /// Abort flags for commands still executing, keyed by sequence
    in_flight: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl CommandExecutor {
    /// Create a new command executor
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            started_at: Instant::now(),
            vms: Arc::new(RwLock::new(HashSet::new())),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of running VMs
    pub async fn vm_count(&self) -> u32 {
        self.vms.read().await.len() as u32
    }

    /// Number of commands currently executing
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Execute a command and return the answer to send back.
    ///
    /// Cancel commands are consumed locally and produce no answer frame:
    /// the server resolves the canceled waiter on its own side.
    pub async fn execute(&self, sequence: u64, command: &Command) -> Option<Answer> {
        let kind = command.kind();
        debug!(sequence, kind = ?kind, "executing command");

        if let CommandPayload::Cancel {
            sequence: victim,
            reason,
        } = &command.payload
        {
            self.abort(*victim, reason).await;
            return None;
        }

        let abort = Arc::new(AtomicBool::new(false));
        self.in_flight.lock().await.insert(sequence, abort.clone());

        let ctx = HandlerContext {
            target_id: self.target_id.clone(),
            sequence,
            uptime_secs: self.started_at.elapsed().as_secs(),
            vms: self.vms.clone(),
            abort,
        };

        let result = match &command.payload {
            CommandPayload::Ping { include_stats } => {
                handlers::handle_ping(&ctx, *include_stats).await
            }
            CommandPayload::GetHostStats { host_guid } => {
                handlers::handle_get_host_stats(&ctx, host_guid).await
            }
            CommandPayload::StartVm {
                vm_name,
                cpu_mhz,
                ram_mb,
                ..
            } => handlers::handle_start_vm(&ctx, vm_name, *cpu_mhz, *ram_mb).await,
            CommandPayload::StopVm {
                vm_name, forced, ..
            } => handlers::handle_stop_vm(&ctx, vm_name, *forced).await,
            CommandPayload::RebootVm { vm_name, .. } => {
                handlers::handle_reboot_vm(&ctx, vm_name).await
            }
            CommandPayload::MigrateVm {
                vm_name,
                dest_target,
            } => handlers::handle_migrate_vm(&ctx, vm_name, dest_target).await,
            CommandPayload::AttachVolume {
                vm_name,
                volume_path,
            } => handlers::handle_attach_volume(&ctx, vm_name, volume_path).await,
            CommandPayload::NetworkRulesSync { vm_name, rules } => {
                handlers::handle_network_rules_sync(&ctx, vm_name, rules).await
            }
            CommandPayload::CleanupNetworkRules { max_age_secs } => {
                handlers::handle_cleanup_network_rules(&ctx, *max_age_secs).await
            }
            CommandPayload::Cancel { .. } => unreachable!("cancel handled above"),
        };

        self.in_flight.lock().await.remove(&sequence);

        let answer = match result {
            HandlerResult::Completed { detail, payload } => {
                debug!(sequence, kind = ?kind, %detail, "command completed");
                Answer {
                    success: true,
                    detail: Some(detail),
                    payload,
                }
            }
            HandlerResult::Failed { detail } => {
                info!(sequence, kind = ?kind, %detail, "command failed");
                Answer::failed(detail)
            }
        };

        Some(answer)
    }

    /// Best-effort abort of an in-flight command by sequence number.
    ///
    /// Sets the abort flag long-running handlers poll; a command that has
    /// already finished (or never existed here) is logged and ignored.
    async fn abort(&self, sequence: u64, reason: &str) {
        let in_flight = self.in_flight.lock().await;
        match in_flight.get(&sequence) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                warn!(sequence, reason, "abort requested for in-flight command");
            }
            None => {
                debug!(sequence, reason, "abort for unknown or finished command");
            }
        }
    }
}
