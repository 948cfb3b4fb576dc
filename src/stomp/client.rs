//! STOMP client over TCP.
//!
//! # Responsibilities
//! - Dial the broker and complete the CONNECT/CONNECTED handshake
//! - Write SEND frames, serialized through one writer lock
//! - Watch the inbound side for ERROR frames and EOF
//! - Emit heart-beats when the broker asks for them
//!
//! Frames are written by a spawned task, so a caller that stops waiting (for
//! instance a breaker timeout) never leaves half a frame on the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::net::transport::{ConnectOptions, Connection, Connector, FrameOption, TransportError};
use crate::stomp::frame::{read_frame, Frame};

/// How long `disconnect` waits for the broker's RECEIPT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);
const DISCONNECT_RECEIPT: &str = "disconnect-1";

/// Dials STOMP 1.2 brokers over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct StompConnector;

impl StompConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn dial(
        &self,
        network: &str,
        addr: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(TransportError::UnsupportedNetwork(network.to_string()));
        }

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(&connect_frame(addr, options).encode(false))
            .await?;

        let connected = match read_frame(&mut reader).await? {
            Some(frame) if frame.command == "CONNECTED" => frame,
            Some(frame) if frame.command == "ERROR" => {
                return Err(TransportError::Broker(error_message(&frame)))
            }
            Some(frame) => {
                return Err(TransportError::Protocol(format!(
                    "expected CONNECTED, got {}",
                    frame.command
                )))
            }
            None => {
                return Err(TransportError::ClosedUnexpectedly(
                    "broker closed the connection during handshake".into(),
                ))
            }
        };

        tracing::debug!(
            addr,
            version = connected.get("version").unwrap_or("1.0"),
            server = connected.get("server").unwrap_or("unknown"),
            "STOMP session established"
        );

        let shared = Arc::new(Shared {
            writer: AsyncMutex::new(write_half),
            state: Mutex::new(SessionState::Open),
            receipt: Notify::new(),
        });

        tokio::spawn(read_loop(shared.clone(), reader));
        if let Some(interval) = heart_beat_interval(options.heart_beat.0, connected.get("heart-beat")) {
            tokio::spawn(heart_beat_loop(shared.clone(), interval));
        }

        Ok(Arc::new(StompConnection { shared }))
    }
}

fn connect_frame(addr: &str, options: &ConnectOptions) -> Frame {
    let host = options.host.clone().unwrap_or_else(|| host_of(addr).to_string());
    let mut frame = Frame::new("CONNECT")
        .header("accept-version", "1.2")
        .header("host", host)
        .header(
            "heart-beat",
            format!("{},{}", options.heart_beat.0, options.heart_beat.1),
        );
    if let Some(login) = &options.login {
        frame = frame.header("login", login.clone());
    }
    if let Some(passcode) = &options.passcode {
        frame = frame.header("passcode", passcode.clone());
    }
    for (key, value) in &options.headers {
        frame = frame.header(key.clone(), value.clone());
    }
    frame
}

fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Client heart-beat period: max(ours, what the server wants), or `None`
/// when either side opted out.
fn heart_beat_interval(client_send_ms: u32, server: Option<&str>) -> Option<Duration> {
    let server_receive_ms: u32 = server?
        .split_once(',')
        .and_then(|(_, receive)| receive.trim().parse().ok())?;
    if client_send_ms == 0 || server_receive_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(client_send_ms.max(server_receive_ms) as u64))
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned())
}

#[derive(Debug, Clone)]
enum SessionState {
    Open,
    ClosedLocally,
    ClosedRemotely(String),
}

#[derive(Debug)]
struct Shared {
    writer: AsyncMutex<OwnedWriteHalf>,
    state: Mutex<SessionState>,
    receipt: Notify,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        match self.state() {
            SessionState::Open => Ok(()),
            SessionState::ClosedLocally => Err(TransportError::AlreadyClosed),
            SessionState::ClosedRemotely(reason) => Err(TransportError::ClosedUnexpectedly(reason)),
        }
    }

    /// Move to `next` unless already closed. Returns whether it changed.
    fn close(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, SessionState::Open) {
            *state = next;
            true
        } else {
            false
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(bytes).await {
            let reason = format!("write failed: {}", e);
            self.close(SessionState::ClosedRemotely(reason.clone()));
            return Err(TransportError::ClosedUnexpectedly(reason));
        }
        Ok(())
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match frame.command.as_str() {
                "ERROR" => {
                    let message = error_message(&frame);
                    tracing::error!(message = %message, "Broker sent ERROR frame");
                    shared.close(SessionState::ClosedRemotely(message));
                    break;
                }
                "RECEIPT" => {
                    tracing::trace!(receipt_id = frame.get("receipt-id"), "Receipt");
                    shared.receipt.notify_one();
                }
                other => tracing::trace!(command = other, "Ignoring inbound frame"),
            },
            Ok(None) => {
                if shared.close(SessionState::ClosedRemotely("broker closed the connection".into())) {
                    tracing::warn!("Broker closed the connection");
                }
                break;
            }
            Err(e) => {
                if shared.close(SessionState::ClosedRemotely(e.to_string())) {
                    tracing::warn!(error = %e, "Inbound stream failed");
                }
                break;
            }
        }
    }
    // wake a pending disconnect; the session is gone either way
    shared.receipt.notify_one();
}

async fn heart_beat_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if shared.check_open().is_err() || shared.write(b"\n").await.is_err() {
            break;
        }
    }
}

/// One STOMP session. Cheap to share; sends are serialized internally.
#[derive(Debug)]
pub struct StompConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for StompConnection {
    async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: &[u8],
        options: &[FrameOption],
    ) -> Result<(), TransportError> {
        self.shared.check_open()?;

        let mut frame = Frame::new("SEND").header("destination", destination);
        if !content_type.is_empty() {
            frame = frame.header("content-type", content_type);
        }
        let mut content_length = true;
        for option in options {
            match option {
                FrameOption::Header(key, value) => frame = frame.header(key.clone(), value.clone()),
                FrameOption::NoContentLength => content_length = false,
            }
        }
        let bytes = frame.body(body.to_vec()).encode(content_length);

        let shared = self.shared.clone();
        tokio::spawn(async move { shared.write(&bytes).await })
            .await
            .map_err(|e| TransportError::Protocol(format!("writer task failed: {}", e)))?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if !self.shared.close(SessionState::ClosedLocally) {
            return Err(TransportError::AlreadyClosed);
        }

        let frame = Frame::new("DISCONNECT").header("receipt", DISCONNECT_RECEIPT);
        self.shared.write(&frame.encode(false)).await?;
        if tokio::time::timeout(DISCONNECT_GRACE, self.shared.receipt.notified())
            .await
            .is_err()
        {
            tracing::debug!("No receipt for DISCONNECT, closing anyway");
        }

        let mut writer = self.shared.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}
