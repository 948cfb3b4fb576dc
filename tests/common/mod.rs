//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broker_dispatch::stomp::frame::{read_frame, Frame};
use broker_dispatch::{
    BackoffPolicy, Config, ConnectOptions, Connection, Connector, DispatchError, FrameOption,
    SendOptions, TransportError,
};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// What the next send attempt on a mock connection does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Deliver,
    Closed,
    Fail,
}

/// A send the mock transport accepted.
#[derive(Debug, Clone)]
pub struct Sent {
    pub destination: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub options: Vec<FrameOption>,
}

/// State shared by a mock connector and every connection it dials.
#[derive(Debug, Default)]
pub struct MockBroker {
    pub dials: AtomicU32,
    pub send_attempts: AtomicU32,
    pub disconnects: AtomicU32,
    pub refuse_dials: AtomicBool,
    sent: Mutex<Vec<Sent>>,
    send_script: Mutex<VecDeque<Scripted>>,
    dial_script: Mutex<VecDeque<bool>>,
    send_delay: Mutex<Duration>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for upcoming send attempts; once exhausted sends succeed.
    pub fn script_sends(&self, outcomes: &[Scripted]) {
        self.send_script.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Queue outcomes for upcoming dials (`false` refuses); once exhausted
    /// dials follow `refuse_dials`.
    pub fn script_dials(&self, outcomes: &[bool]) {
        self.dial_script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            broker: self.clone(),
        })
    }
}

pub struct MockConnector {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(
        &self,
        _network: &str,
        _addr: &str,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        self.broker.dials.fetch_add(1, Ordering::SeqCst);
        let accept = self
            .broker
            .dial_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(!self.broker.refuse_dials.load(Ordering::SeqCst));
        if !accept {
            return Err(TransportError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        Ok(Arc::new(MockConnection {
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockConnection {
    broker: Arc<MockBroker>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: &[u8],
        options: &[FrameOption],
    ) -> Result<(), TransportError> {
        self.broker.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }

        let delay = *self.broker.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .broker
            .send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Deliver);
        match outcome {
            Scripted::Deliver => {
                self.broker.sent.lock().unwrap().push(Sent {
                    destination: destination.to_string(),
                    content_type: content_type.to_string(),
                    body: body.to_vec(),
                    options: options.to_vec(),
                });
                Ok(())
            }
            Scripted::Closed => {
                self.closed.store(true, Ordering::SeqCst);
                Err(TransportError::ClosedUnexpectedly("peer went away".into()))
            }
            Scripted::Fail => Err(TransportError::Broker("rejected".into())),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }
        self.broker.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config with a fast custom backoff that counts its invocations.
pub fn test_config(sleeps: Arc<AtomicU32>) -> Config {
    Config {
        max_workers: 4,
        backoff: BackoffPolicy::custom(move |_| {
            sleeps.fetch_add(1, Ordering::SeqCst);
            Duration::from_millis(1)
        }),
        ..Default::default()
    }
}

/// What an after-hook reported.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub identifier: String,
    pub destination: String,
    pub error: Option<String>,
    pub kind: Option<&'static str>,
    pub circuit_open: bool,
    pub connect_error: bool,
}

/// Options whose after-hook forwards outcomes to the returned receiver.
pub fn reporting_options() -> (SendOptions, mpsc::UnboundedReceiver<Outcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let options = SendOptions::new().after(move |ctx, err: Option<&DispatchError>| {
        let _ = tx.send(Outcome {
            identifier: ctx.identifier.to_string(),
            destination: ctx.destination.path(),
            error: err.map(|e| e.to_string()),
            kind: err.map(|e| e.kind()),
            circuit_open: err.is_some_and(|e| e.is_circuit_open()),
            connect_error: err.is_some_and(|e| e.is_connect()),
        });
    });
    (options, rx)
}

/// Receive one outcome or fail the test after a second.
pub async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for after-hook")
        .expect("hook channel closed")
}

/// Start a minimal STOMP broker on an ephemeral port.
///
/// Answers CONNECT with CONNECTED and DISCONNECT with a RECEIPT, and forwards
/// every inbound frame to the returned receiver. If `reject_login` is set,
/// CONNECT is answered with an ERROR frame.
pub async fn start_mock_broker(reject_login: bool) -> (SocketAddr, mpsc::UnboundedReceiver<Frame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = socket.into_split();
                        let mut reader = BufReader::new(read_half);
                        while let Ok(Some(frame)) = read_frame(&mut reader).await {
                            let reply = match frame.command.as_str() {
                                "CONNECT" | "STOMP" if reject_login => Some(
                                    Frame::new("ERROR")
                                        .header("message", "bad credentials")
                                        .encode(true),
                                ),
                                "CONNECT" | "STOMP" => Some(
                                    Frame::new("CONNECTED")
                                        .header("version", "1.2")
                                        .header("heart-beat", "0,0")
                                        .encode(false),
                                ),
                                "DISCONNECT" => frame.get("receipt").map(|id| {
                                    Frame::new("RECEIPT").header("receipt-id", id).encode(false)
                                }),
                                _ => None,
                            };
                            let command = frame.command.clone();
                            let _ = tx.send(frame);
                            if let Some(reply) = reply {
                                if write_half.write_all(&reply).await.is_err() {
                                    break;
                                }
                            }
                            if command == "DISCONNECT" || reject_login {
                                let _ = write_half.shutdown().await;
                                break;
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// Receive the next frame with the given command, skipping others.
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Frame>, command: &str) -> Frame {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = rx.recv().await.expect("broker channel closed");
            if frame.command == command {
                return frame;
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}
