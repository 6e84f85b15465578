//! Individual agent session handling

use anyhow::Result;
use corral_shared::{
    codec::{self, FrameDecoder},
    Envelope, StartupReport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Handle to send envelopes to a specific agent
#[derive(Clone)]
pub struct SessionHandle {
    pub target_id: String,
    pub addr: SocketAddr,
    writer: Arc<Mutex<WriteHalf<TcpStream>>>,
    pub connected_at: Instant,
}

impl SessionHandle {
    /// Send an envelope to this agent
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let encoded = codec::encode(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

/// Active agent session
pub struct TargetSession {
    handle: SessionHandle,
    reader: ReadHalf<TcpStream>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl TargetSession {
    /// Create a new session from a TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        let handle = SessionHandle {
            target_id: String::new(), // Set by the startup handshake
            addr,
            writer: Arc::new(Mutex::new(writer)),
            connected_at: Instant::now(),
        };

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Get a cloneable handle for sending envelopes
    pub fn get_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Wait for the startup handshake.
    ///
    /// The first frame an agent sends must be a `Startup` report; anything
    /// else (or a closed connection) fails the handshake.
    pub async fn handshake(&mut self) -> Option<StartupReport> {
        match self.recv().await {
            Some(Envelope::Startup(report)) => {
                if report.target_id.is_empty() {
                    warn!(addr = %self.handle.addr, "startup report without target id");
                    return None;
                }
                self.handle.target_id = report.target_id.clone();
                debug!(
                    target = %report.target_id,
                    guid = %report.guid,
                    version = %report.version,
                    "startup handshake complete"
                );
                Some(report)
            }
            Some(other) => {
                warn!(addr = %self.handle.addr, envelope = ?other, "expected startup frame first");
                None
            }
            None => None,
        }
    }

    /// Read the next envelope from this session
    /// Returns None if the connection is closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            // First try to decode from existing buffer
            match self.decoder.decode_next() {
                Ok(Some(envelope)) => return Some(envelope),
                Ok(None) => {
                    // Need more data
                }
                Err(e) => {
                    warn!(addr = %self.handle.addr, error = %e, "decode error");
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None, // Connection closed
                Ok(n) => {
                    self.decoder.extend(&self.read_buf[..n]);
                }
                Err(e) => {
                    warn!(addr = %self.handle.addr, error = %e, "read error");
                    return None;
                }
            }
        }
    }

    /// Get the target ID (empty until the handshake completes)
    pub fn target_id(&self) -> &str {
        &self.handle.target_id
    }

    /// Get the remote address
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }
}

/// Target state tracked by the server
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub target_id: String,
    pub guid: String,
    pub version: String,
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

impl TargetInfo {
    pub fn new(report: &StartupReport, addr: SocketAddr) -> Self {
        Self {
            target_id: report.target_id.clone(),
            guid: report.guid.clone(),
            version: report.version.clone(),
            addr,
            connected_at: Instant::now(),
        }
    }
}
