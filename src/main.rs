mod command;
mod connection;

use command::CommandExecutor;
use connection::{AgentConfig, ConnectionEvent, ConnectionManager, ServerRole};
use corral_shared::{AnswerFrame, Envelope};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AgentConfig::default();

    info!("Host agent starting: {}", config.target_id);
    info!("  management server: {}", config.primary_server);
    if let Some(secondary) = &config.secondary_server {
        info!("  secondary server: {}", secondary);
    }

    let executor = Arc::new(CommandExecutor::new(config.target_id.clone()));
    let mut conn = ConnectionManager::new(config);

    // Main event loop
    loop {
        match conn.recv().await {
            Some(ConnectionEvent::Connected { server }) => {
                if server == ServerRole::Secondary {
                    warn!("Connected to secondary server; primary unreachable");
                } else {
                    info!("Connected to {} server", server);
                }
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!("Disconnected: {}", reason);
            }
            Some(ConnectionEvent::ServerSwitched { from, to }) => {
                info!("Server switched: {} -> {}", from, to);
            }
            Some(ConnectionEvent::ConnectionFailed { reason }) => {
                error!("Connection failed: {}", reason);
            }
            Some(ConnectionEvent::Received(envelope)) => {
                handle_server_envelope(envelope, &conn, &executor).await;
            }
            None => {
                error!("Connection manager closed");
                break;
            }
        }
    }
}

async fn handle_server_envelope(
    envelope: Envelope,
    conn: &ConnectionManager,
    executor: &Arc<CommandExecutor>,
) {
    match envelope {
        Envelope::Command(frame) => {
            // Execute concurrently; per-target ordering is the server's
            // concern and sequence-bound commands arrive one at a time
            let sender = conn.get_sender();
            let executor = executor.clone();
            tokio::spawn(async move {
                let sequence = frame.sequence;
                if let Some(answer) = executor.execute(sequence, &frame.command).await {
                    let reply = Envelope::Answer(AnswerFrame { sequence, answer });
                    if sender.send(reply).await.is_err() {
                        error!(sequence, "failed to queue answer; connection closed");
                    }
                }
            });
        }
        Envelope::Answer(frame) => {
            debug!(sequence = frame.sequence, "unexpected answer from server; ignored");
        }
        Envelope::Startup(_) => {
            debug!("unexpected startup report from server; ignored");
        }
    }
}
