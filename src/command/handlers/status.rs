//! Monitoring command handlers (ping, host stats)

use super::HandlerContext;
use crate::command::HandlerResult;
use corral_shared::AnswerPayload;

/// Handle the recurring ping command
pub async fn handle_ping(ctx: &HandlerContext, include_stats: bool) -> HandlerResult {
    let vm_count = if include_stats {
        ctx.vms.read().await.len() as u32
    } else {
        0
    };

    HandlerResult::Completed {
        detail: format!("pong from {}", ctx.target_id),
        payload: Some(AnswerPayload::Ping {
            host_uptime_secs: ctx.uptime_secs,
            vm_count,
        }),
    }
}

/// Handle GetHostStats
pub async fn handle_get_host_stats(ctx: &HandlerContext, host_guid: &str) -> HandlerResult {
    if host_guid.is_empty() {
        return HandlerResult::Failed {
            detail: "missing host guid".into(),
        };
    }

    // Simulated load figures scaled by how busy the host is
    let vm_count = ctx.vms.read().await.len() as u64;
    let mem_total_mb = 32 * 1024;
    let mem_used_mb = 2048 + vm_count * 1024;

    HandlerResult::Completed {
        detail: format!("stats for {}", host_guid),
        payload: Some(AnswerPayload::HostStats {
            cpu_used_percent: (vm_count as f64 * 6.25).min(100.0),
            mem_used_mb,
            mem_total_mb,
        }),
    }
}
