//! Persistent connection to the management server
//!
//! This module handles:
//! - Connecting with primary/secondary server failover
//! - Automatic reconnection with exponential backoff
//! - The startup handshake registering this agent as a target
//! - Framed envelope reads/writes

mod manager;

pub use manager::{AgentConfig, ConnectionEvent, ConnectionManager, ServerRole};
