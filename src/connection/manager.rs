//! Connection manager with persistent connections and automatic reconnection

use anyhow::{anyhow, Result};
use corral_shared::{
    codec::{self, FrameDecoder},
    Envelope, StartupReport,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Successfully connected and handshake sent
    Connected { server: ServerRole },
    /// Disconnected from server
    Disconnected { reason: String },
    /// Received an envelope from the server
    Received(Envelope),
    /// Failed to connect on all configured servers
    ConnectionFailed { reason: String },
    /// Failed over between management servers
    ServerSwitched { from: ServerRole, to: ServerRole },
}

/// Which configured management server the agent is talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Secondary,
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerRole::Primary => write!(f, "primary"),
            ServerRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Configuration for the agent connection
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Target ID this agent registers as
    pub target_id: String,
    /// Stable identity reported in the startup handshake
    pub guid: String,
    /// Primary management server address
    pub primary_server: String,
    /// Optional secondary management server for failover
    pub secondary_server: Option<String>,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read timeout (idle connections are expected; this only bounds one read)
    pub read_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            target_id: "host-001".into(),
            guid: "host-001-guid".into(),
            primary_server: "127.0.0.1:8250".into(),
            secondary_server: None,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Manages a persistent connection to the management server with failover
pub struct ConnectionManager {
    config: AgentConfig,
    /// Channel to send envelopes to the server
    outbound_tx: mpsc::Sender<Envelope>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: AgentConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, outbound_rx, event_tx).await;
        });

        Self {
            config,
            outbound_tx,
            event_rx,
        }
    }

    /// Send an envelope to the server
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Get the target ID
    pub fn target_id(&self) -> &str {
        &self.config.target_id
    }

    /// Get a clone of the sender for outbound envelopes
    pub fn get_sender(&self) -> mpsc::Sender<Envelope> {
        self.outbound_tx.clone()
    }
}

/// Main connection loop with failover and reconnection
async fn connection_loop(
    config: AgentConfig,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut current_role = ServerRole::Primary;
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        let addr = match current_role {
            ServerRole::Primary => config.primary_server.clone(),
            ServerRole::Secondary => match &config.secondary_server {
                Some(addr) => addr.clone(),
                None => {
                    current_role = ServerRole::Primary;
                    config.primary_server.clone()
                }
            },
        };

        match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay; // Reset delay

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        server: current_role,
                    })
                    .await;

                if let Err(reason) =
                    handle_connection(stream, &config, &mut outbound_rx, &event_tx).await
                {
                    let _ = event_tx
                        .send(ConnectionEvent::Disconnected {
                            reason: reason.to_string(),
                        })
                        .await;
                }
            }
            Ok(Err(e)) => {
                if current_role == ServerRole::Primary && config.secondary_server.is_some() {
                    let _ = event_tx
                        .send(ConnectionEvent::ServerSwitched {
                            from: ServerRole::Primary,
                            to: ServerRole::Secondary,
                        })
                        .await;
                    current_role = ServerRole::Secondary;
                    continue; // Try the secondary immediately
                }
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!("All servers failed: {}", e),
                    })
                    .await;
            }
            Err(_) => {
                // Connect timeout
                if current_role == ServerRole::Primary && config.secondary_server.is_some() {
                    current_role = ServerRole::Secondary;
                    continue;
                }
            }
        }

        // Wait before reconnecting, with exponential backoff
        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);

        // Reset to the primary server for the next attempt
        current_role = ServerRole::Primary;
    }
}

/// Handle an active connection
async fn handle_connection(
    stream: TcpStream,
    config: &AgentConfig,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    // Register this agent before anything else flows
    let startup = Envelope::Startup(StartupReport {
        target_id: config.target_id.clone(),
        guid: config.guid.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    });
    writer.write_all(&codec::encode(&startup)?).await?;

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            // Send outbound envelopes
            Some(envelope) = outbound_rx.recv() => {
                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await?;
            }

            // Read incoming envelopes
            result = timeout(config.read_timeout, reader.read(&mut read_buf)) => {
                match result {
                    Ok(Ok(0)) => {
                        return Err(anyhow!("Server closed connection"));
                    }
                    Ok(Ok(n)) => {
                        decoder.extend(&read_buf[..n]);

                        // Process all complete frames
                        while let Ok(Some(envelope)) = decoder.decode_next() {
                            let _ = event_tx.send(ConnectionEvent::Received(envelope)).await;
                        }
                    }
                    Ok(Err(e)) => {
                        return Err(anyhow!("Read error: {}", e));
                    }
                    Err(_) => {
                        // Read timeout; a quiet wire is normal between commands
                        debug!("no traffic within read timeout");
                    }
                }
            }
        }
    }
}
