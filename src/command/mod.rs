//! Command execution infrastructure for the host agent
//!
//! This module handles:
//! - Receiving commands from the management server
//! - Dispatching to the appropriate command handlers
//! - Generating answer frames
//! - Best-effort aborts for canceled commands

mod executor;
pub mod handlers;

pub use executor::{CommandExecutor, HandlerResult};
