//! Command handlers by functional area

mod network;
mod status;
mod storage;
mod vm;

pub use network::{handle_cleanup_network_rules, handle_network_rules_sync};
pub use status::{handle_get_host_stats, handle_ping};
pub use storage::handle_attach_volume;
pub use vm::{handle_migrate_vm, handle_reboot_vm, handle_start_vm, handle_stop_vm};

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Context passed to command handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub target_id: String,
    pub sequence: u64,
    pub uptime_secs: u64,
    /// Running VMs simulated on this host
    pub vms: Arc<RwLock<HashSet<String>>>,
    /// Set when the server cancels this command; long-running handlers poll it
    pub abort: Arc<AtomicBool>,
}

impl HandlerContext {
    pub fn aborted(&self) -> bool {
        self.abort.load(std::sync::atomic::Ordering::SeqCst)
    }
}
