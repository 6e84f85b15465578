//! Session manager for tracking all connected agents

use super::connection::{SessionHandle, TargetInfo};
use crate::dispatch::Transport;
use anyhow::anyhow;
use async_trait::async_trait;
use corral_shared::{Envelope, StartupReport};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Manages all active agent sessions
pub struct SessionManager {
    /// Map of target_id -> session entry
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

struct SessionEntry {
    handle: SessionHandle,
    info: TargetInfo,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new agent session from its startup report
    pub async fn register(&self, handle: SessionHandle, report: &StartupReport) {
        let info = TargetInfo::new(report, handle.addr);
        let entry = SessionEntry { handle, info };

        let mut sessions = self.sessions.write().await;
        sessions.insert(report.target_id.clone(), entry);
    }

    /// Unregister an agent session
    pub async fn unregister(&self, target_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(target_id);
    }

    /// Get a session handle for a specific target
    pub async fn get(&self, target_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(target_id).map(|e| e.handle.clone())
    }

    /// Send an envelope to a specific target
    pub async fn send_to(&self, target_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
        let handle = self
            .get(target_id)
            .await
            .ok_or_else(|| anyhow!("Target not connected: {}", target_id))?;
        handle.send(envelope).await
    }

    /// Get list of all connected target IDs
    pub async fn connected_targets(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    /// Get info about a specific target
    pub async fn get_info(&self, target_id: &str) -> Option<TargetInfo> {
        let sessions = self.sessions.read().await;
        sessions.get(target_id).map(|e| e.info.clone())
    }

    /// Get the number of connected targets
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SessionManager {
    async fn transmit(&self, target_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
        self.send_to(target_id, envelope).await
    }
}
