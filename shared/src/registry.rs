//! Command registry: per-kind default wait budgets and sequencing policy.
//!
//! Both lookups are table-driven functions of the discriminator, and the
//! policy is a pure function of command state. The dispatch channel
//! evaluates it exactly once at submission time.

use crate::command::{Command, CommandKind, CommandPayload};
use crate::defaults;

/// Default wait budget (seconds) for a given command kind, used when the
/// command itself carries `wait_secs == 0`.
pub fn default_wait_secs(kind: CommandKind) -> u64 {
    match kind {
        CommandKind::Ping => 10,
        CommandKind::GetHostStats => 10,
        CommandKind::Cancel => 10,
        CommandKind::StartVm => 120,
        CommandKind::StopVm => 120,
        CommandKind::RebootVm => 120,
        CommandKind::MigrateVm => 3600,
        CommandKind::AttachVolume => 300,
        CommandKind::NetworkRulesSync => 60,
        CommandKind::CleanupNetworkRules => defaults::FALLBACK_WAIT_SECS,
    }
}

/// Default sequencing policy for a given command kind.
///
/// Administrative commands that mutate host or VM state are serialized per
/// target; monitoring commands and cancels may overlap with anything.
pub fn default_sequence_bound(kind: CommandKind) -> bool {
    match kind {
        CommandKind::Ping
        | CommandKind::GetHostStats
        | CommandKind::CleanupNetworkRules
        | CommandKind::Cancel => false,
        CommandKind::StartVm
        | CommandKind::StopVm
        | CommandKind::RebootVm
        | CommandKind::MigrateVm
        | CommandKind::AttachVolume
        | CommandKind::NetworkRulesSync => true,
    }
}

/// Whether this command must execute in submission order relative to other
/// sequence-bound commands for the same target.
///
/// VM lifecycle commands addressed to a system VM are exempt from their
/// kind's default: a stuck user-VM operation must never delay restarting a
/// virtual router.
pub fn is_sequence_bound(command: &Command) -> bool {
    match &command.payload {
        CommandPayload::StartVm { system_vm: true, .. }
        | CommandPayload::StopVm { system_vm: true, .. }
        | CommandPayload::RebootVm { system_vm: true, .. } => false,
        _ => default_sequence_bound(command.kind()),
    }
}

/// Resolve the wait budget actually applied to a command.
pub fn effective_wait_secs(command: &Command) -> u64 {
    if command.wait_secs > 0 {
        command.wait_secs
    } else {
        default_wait_secs(command.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitoring_commands_not_sequence_bound() {
        let ping = Command::new(CommandPayload::Ping { include_stats: false });
        assert!(!is_sequence_bound(&ping));

        let stats = Command::new(CommandPayload::GetHostStats {
            host_guid: "host-guid-1".into(),
        });
        assert!(!is_sequence_bound(&stats));
    }

    #[test]
    fn test_admin_commands_sequence_bound() {
        let start = Command::new(CommandPayload::StartVm {
            vm_name: "i-2-7-VM".into(),
            system_vm: false,
            cpu_mhz: 1000,
            ram_mb: 1024,
        });
        assert!(is_sequence_bound(&start));

        let migrate = Command::new(CommandPayload::MigrateVm {
            vm_name: "i-2-7-VM".into(),
            dest_target: "host-2".into(),
        });
        assert!(is_sequence_bound(&migrate));
    }

    #[test]
    fn test_system_vm_exemption() {
        let stop_router = Command::new(CommandPayload::StopVm {
            vm_name: "v-4-VM".into(),
            system_vm: true,
            forced: false,
        });
        assert!(!is_sequence_bound(&stop_router));

        let reboot_router = Command::new(CommandPayload::RebootVm {
            vm_name: "v-4-VM".into(),
            system_vm: true,
        });
        assert!(!is_sequence_bound(&reboot_router));
    }

    #[test]
    fn test_cancel_never_sequence_bound() {
        let cancel = Command::new(CommandPayload::Cancel {
            sequence: 12,
            reason: "wait budget exceeded".into(),
        });
        assert!(!is_sequence_bound(&cancel));
    }

    #[test]
    fn test_effective_wait_prefers_command_budget() {
        let cmd = Command::new(CommandPayload::Ping { include_stats: false });
        assert_eq!(effective_wait_secs(&cmd), 10);

        let cmd = cmd.with_wait(99);
        assert_eq!(effective_wait_secs(&cmd), 99);
    }
}
