//! Network command handlers (rule sync, recurring cleanup)

use super::HandlerContext;
use crate::command::HandlerResult;
use corral_shared::AnswerPayload;
use tracing::debug;

/// Handle NetworkRulesSync
pub async fn handle_network_rules_sync(
    ctx: &HandlerContext,
    vm_name: &str,
    rules: &[String],
) -> HandlerResult {
    if !ctx.vms.read().await.contains(vm_name) {
        return HandlerResult::Failed {
            detail: format!("{} not running", vm_name),
        };
    }

    for rule in rules {
        debug!(vm = vm_name, rule = %rule, "programming rule");
    }

    HandlerResult::Completed {
        detail: format!("{} rules programmed for {}", rules.len(), vm_name),
        payload: None,
    }
}

/// Handle the recurring CleanupNetworkRules command
pub async fn handle_cleanup_network_rules(
    ctx: &HandlerContext,
    max_age_secs: u64,
) -> HandlerResult {
    // Rules belonging to VMs no longer on this host are the stale set;
    // with the simulated table that is simply "none", which is the common
    // steady-state answer in production too.
    let removed_rules = 0;
    debug!(
        target = %ctx.target_id,
        max_age_secs,
        removed_rules,
        "network rule cleanup pass"
    );

    HandlerResult::Completed {
        detail: format!("removed {} stale rules", removed_rules),
        payload: Some(AnswerPayload::NetworkRulesCleanup { removed_rules }),
    }
}
