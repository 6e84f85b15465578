//! Session management for tracking connected host agents
//!
//! This module handles:
//! - The startup handshake that registers a target
//! - Tracking all connected agent sessions
//! - Framed envelope reads/writes per session
//! - The transport seam the dispatch channel sends through

mod manager;
mod connection;

pub use manager::SessionManager;
pub use connection::{SessionHandle, TargetInfo, TargetSession};
