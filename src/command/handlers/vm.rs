//! VM lifecycle command handlers (start, stop, reboot, migrate)

use super::HandlerContext;
use crate::command::HandlerResult;
use corral_shared::AnswerPayload;
use std::time::Duration;
use tracing::debug;

/// Migration runs in steps so a cancel can interrupt it between steps
const MIGRATE_STEPS: u32 = 5;
const MIGRATE_STEP_DELAY: Duration = Duration::from_millis(100);

/// Handle StartVm
pub async fn handle_start_vm(
    ctx: &HandlerContext,
    vm_name: &str,
    cpu_mhz: u32,
    ram_mb: u64,
) -> HandlerResult {
    if vm_name.is_empty() {
        return HandlerResult::Failed {
            detail: "missing vm name".into(),
        };
    }

    let mut vms = ctx.vms.write().await;
    if !vms.insert(vm_name.to_string()) {
        return HandlerResult::Failed {
            detail: format!("{} already running", vm_name),
        };
    }
    let vnc_port = 5900 + vms.len() as u16;
    drop(vms);

    debug!(vm = vm_name, cpu_mhz, ram_mb, "vm started");
    HandlerResult::Completed {
        detail: format!("{} started", vm_name),
        payload: Some(AnswerPayload::StartVm { vnc_port }),
    }
}

/// Handle StopVm
pub async fn handle_stop_vm(ctx: &HandlerContext, vm_name: &str, forced: bool) -> HandlerResult {
    let removed = ctx.vms.write().await.remove(vm_name);

    if removed || forced {
        // Forced stop is idempotent cleanup: success even if nothing ran
        HandlerResult::Completed {
            detail: format!("{} stopped", vm_name),
            payload: None,
        }
    } else {
        HandlerResult::Failed {
            detail: format!("{} not running", vm_name),
        }
    }
}

/// Handle RebootVm
pub async fn handle_reboot_vm(ctx: &HandlerContext, vm_name: &str) -> HandlerResult {
    if !ctx.vms.read().await.contains(vm_name) {
        return HandlerResult::Failed {
            detail: format!("{} not running", vm_name),
        };
    }

    HandlerResult::Completed {
        detail: format!("{} rebooted", vm_name),
        payload: None,
    }
}

/// Handle MigrateVm
///
/// Simulated as a stepped copy that checks the abort flag between steps;
/// an aborted migration leaves the VM running on this host.
pub async fn handle_migrate_vm(
    ctx: &HandlerContext,
    vm_name: &str,
    dest_target: &str,
) -> HandlerResult {
    if !ctx.vms.read().await.contains(vm_name) {
        return HandlerResult::Failed {
            detail: format!("{} not running", vm_name),
        };
    }

    for step in 1..=MIGRATE_STEPS {
        if ctx.aborted() {
            return HandlerResult::Failed {
                detail: format!("{} migration aborted at step {}", vm_name, step),
            };
        }
        debug!(vm = vm_name, dest = dest_target, step, "migration step");
        tokio::time::sleep(MIGRATE_STEP_DELAY).await;
    }

    ctx.vms.write().await.remove(vm_name);
    HandlerResult::Completed {
        detail: format!("{} migrated to {}", vm_name, dest_target),
        payload: None,
    }
}
