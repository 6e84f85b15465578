//! Command/Answer envelopes exchanged between the management server and
//! host agents.
//!
//! Commands go on the wire as `{"type": .., "sequence": .., "fields": ..}`
//! and answers as `{"type": .., "sequence": .., "success": .., ...}`, both
//! wrapped in a tagged [`Envelope`].

use serde::{Deserialize, Serialize};

/// Fieldless discriminator for command kinds.
///
/// Used as the key for registry lookups (default wait budget, default
/// sequencing policy) and for cron-job identity per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Ping,
    GetHostStats,
    StartVm,
    StopVm,
    RebootVm,
    MigrateVm,
    AttachVolume,
    NetworkRulesSync,
    CleanupNetworkRules,
    Cancel,
}

/// Kind-specific command fields.
///
/// VM lifecycle payloads carry an explicit `system_vm` flag: commands
/// addressed to a system VM (console proxy, virtual router) bypass
/// sequencing so they never queue behind slow user-VM operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields")]
pub enum CommandPayload {
    Ping {
        include_stats: bool,
    },
    GetHostStats {
        host_guid: String,
    },
    StartVm {
        vm_name: String,
        system_vm: bool,
        cpu_mhz: u32,
        ram_mb: u64,
    },
    StopVm {
        vm_name: String,
        system_vm: bool,
        forced: bool,
    },
    RebootVm {
        vm_name: String,
        system_vm: bool,
    },
    MigrateVm {
        vm_name: String,
        dest_target: String,
    },
    AttachVolume {
        vm_name: String,
        volume_path: String,
    },
    NetworkRulesSync {
        vm_name: String,
        rules: Vec<String>,
    },
    CleanupNetworkRules {
        max_age_secs: u64,
    },
    /// Best-effort abort of an earlier command on the same target,
    /// identified by its sequence number. Never sequence-bound itself.
    Cancel {
        sequence: u64,
        reason: String,
    },
}

impl CommandPayload {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::Ping { .. } => CommandKind::Ping,
            CommandPayload::GetHostStats { .. } => CommandKind::GetHostStats,
            CommandPayload::StartVm { .. } => CommandKind::StartVm,
            CommandPayload::StopVm { .. } => CommandKind::StopVm,
            CommandPayload::RebootVm { .. } => CommandKind::RebootVm,
            CommandPayload::MigrateVm { .. } => CommandKind::MigrateVm,
            CommandPayload::AttachVolume { .. } => CommandKind::AttachVolume,
            CommandPayload::NetworkRulesSync { .. } => CommandKind::NetworkRulesSync,
            CommandPayload::CleanupNetworkRules { .. } => CommandKind::CleanupNetworkRules,
            CommandPayload::Cancel { .. } => CommandKind::Cancel,
        }
    }
}

/// A request unit addressed to a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Wait budget in seconds; 0 means use the registry default
    #[serde(default)]
    pub wait_secs: u64,
    /// Recurring commands carry a repeat interval; plain commands none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_secs: Option<u64>,
    #[serde(flatten)]
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(payload: CommandPayload) -> Self {
        Self {
            wait_secs: 0,
            repeat_interval_secs: None,
            payload,
        }
    }

    /// Override the registry's default wait budget
    pub fn with_wait(mut self, wait_secs: u64) -> Self {
        self.wait_secs = wait_secs;
        self
    }

    /// Mark this command as recurring with the given interval
    pub fn every_secs(mut self, interval_secs: u64) -> Self {
        self.repeat_interval_secs = Some(interval_secs);
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval_secs.is_some()
    }
}

/// Structured result data specific to the originating command kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AnswerPayload {
    Ping {
        host_uptime_secs: u64,
        vm_count: u32,
    },
    HostStats {
        cpu_used_percent: f64,
        mem_used_mb: u64,
        mem_total_mb: u64,
    },
    StartVm {
        vnc_port: u16,
    },
    NetworkRulesCleanup {
        removed_rules: u32,
    },
}

/// A response unit correlated 1:1 with a [`Command`].
///
/// `success == false` is a normal business outcome carrying the remote
/// failure detail verbatim, not a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub payload: Option<AnswerPayload>,
}

impl Answer {
    /// Create a bare success answer
    pub fn success() -> Self {
        Self {
            success: true,
            detail: None,
            payload: None,
        }
    }

    /// Create a success answer carrying structured result data
    pub fn success_with(payload: AnswerPayload) -> Self {
        Self {
            success: true,
            detail: None,
            payload: Some(payload),
        }
    }

    /// Create a failure answer with human-readable detail
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
            payload: None,
        }
    }

    /// Attach human-readable detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A command paired with its per-target sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub sequence: u64,
    #[serde(flatten)]
    pub command: Command,
}

/// An answer paired with the sequence number of the command it resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerFrame {
    pub sequence: u64,
    #[serde(flatten)]
    pub answer: Answer,
}

/// First frame an agent sends after connecting; registers the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupReport {
    pub target_id: String,
    pub guid: String,
    pub version: String,
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Envelope {
    Startup(StartupReport),
    Command(CommandFrame),
    Answer(AnswerFrame),
}
