//! Storage command handlers (volume attach)

use super::HandlerContext;
use crate::command::HandlerResult;

/// Handle AttachVolume
pub async fn handle_attach_volume(
    ctx: &HandlerContext,
    vm_name: &str,
    volume_path: &str,
) -> HandlerResult {
    if volume_path.is_empty() {
        return HandlerResult::Failed {
            detail: "missing volume path".into(),
        };
    }

    if !ctx.vms.read().await.contains(vm_name) {
        return HandlerResult::Failed {
            detail: format!("{} not running", vm_name),
        };
    }

    HandlerResult::Completed {
        detail: format!("{} attached to {}", volume_path, vm_name),
        payload: None,
    }
}
