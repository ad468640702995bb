//! WebSocket channel server.
//!
//! Each browser client holds one persistent channel. On connect the server
//! sends a welcome frame carrying its identity and the current `connected`
//! flag; after that every inbound text frame is a `{command, ...params}`
//! object answered by exactly one outbound frame.
//!
//! # Architecture
//!
//! ```text
//! Browser A ┐                       ┌──► Dispatcher ──► DeviceService
//!           ├──> WsServer (accept) ─┤
//! Browser B ┘        │              └──► one task per session
//!                    └── CancellationToken (stop accepting, close sessions)
//! ```
//!
//! Malformed frames, unknown commands and worker failures are answered
//! with `success: false`; none of them closes the channel.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use zkbridge_core::{ClientIdentity, DeviceConfig, WebSocketConfig};
//! use zkbridge_hardware::{ConnectionManager, DeviceService};
//! use zkbridge_network::{Dispatcher, WsServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let device = DeviceConfig::default();
//! let manager = ConnectionManager::new(&device, ClientIdentity::resolve(None));
//! let dispatcher = Dispatcher::new(DeviceService::new(manager, &device));
//!
//! let server = WsServer::bind(&WebSocketConfig::default(), dispatcher).await?;
//! server.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

use crate::dispatcher::{CaptureFields, Command, CommandOutcome, DispatchError, Dispatcher};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zkbridge_core::{CaptureResult, WebSocketConfig};

/// Errors raised by the channel server itself.
///
/// Per-frame failures never show up here; they are answered in-band.
#[derive(Debug, Error)]
pub enum WsServerError {
    /// Failed to bind the listener
    #[error("Failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake or framing error on one session
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Bound channel server, ready to [`run`](WsServer::run).
///
/// The configured path is advertised in logs only; the handshake accepts
/// any request path, as existing browser clients connect to the root.
#[derive(Debug)]
pub struct WsServer {
    listener: TcpListener,
    path: String,
    dispatcher: Dispatcher,
}

impl WsServer {
    /// Bind the listener. Port `0` picks an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`WsServerError::Bind`] if the address is unavailable.
    pub async fn bind(config: &WebSocketConfig, dispatcher: Dispatcher) -> Result<Self, WsServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| WsServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        Ok(Self {
            listener,
            path: config.path.clone(),
            dispatcher,
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Propagates the socket error if the address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, WsServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept channels until `shutdown` fires, then close every session and
    /// wait for them to finish.
    ///
    /// # Errors
    ///
    /// Only listener-level failures are returned; session errors are logged.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WsServerError> {
        let addr = self.local_addr()?;
        info!(url = %format!("ws://{}{}", addr, self.path), "WebSocket server listening");

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let session = Session {
                        id: Uuid::new_v4(),
                        peer,
                        dispatcher: self.dispatcher.clone(),
                        shutdown: shutdown.child_token(),
                    };
                    sessions.spawn(session.run(stream));
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        info!(sessions = sessions.len(), "WebSocket server stopping");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Session task failed");
            }
        }

        Ok(())
    }
}

struct Session {
    id: Uuid,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Session {
    async fn run(self, stream: TcpStream) {
        let (id, peer) = (self.id, self.peer);
        match self.serve(stream).await {
            Ok(()) => info!(session = %id, %peer, "Client disconnected"),
            Err(e) => warn!(session = %id, %peer, error = %e, "Session closed with error"),
        }
    }

    async fn serve(self, stream: TcpStream) -> Result<(), WsServerError> {
        let channel = accept_async(stream).await?;
        let _guard = self.dispatcher.register_client();
        info!(
            session = %self.id,
            peer = %self.peer,
            clients = self.dispatcher.connected_clients(),
            "Client connected"
        );

        let (mut sink, mut source) = channel.split();
        sink.send(Message::Text(welcome(&self.dispatcher).to_string()))
            .await?;

        loop {
            let message = tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!(session = %self.id, "Closing session for shutdown");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = source.next() => message,
            };

            match message {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text(&self.dispatcher, &text).await;
                    sink.send(Message::Text(reply.to_string())).await?;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let reply = match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(&self.dispatcher, text).await,
                        Err(_) => invalid_json(),
                    };
                    sink.send(Message::Text(reply.to_string())).await?;
                }
                Some(Ok(Message::Ping(payload))) => sink.send(Message::Pong(payload)).await?,
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
            }
        }
    }
}

/// First frame sent on every channel.
#[must_use]
pub fn welcome(dispatcher: &Dispatcher) -> Value {
    let server = dispatcher.server_info();
    json!({
        "type": "welcome",
        "message": "ZK9500 Service Connected",
        "server_info": {
            "hostname": server.hostname,
            "ip": server.ip,
            "service_version": server.service_version,
            "device_connected": server.device_connected,
        },
    })
}

/// Answer one inbound text frame.
///
/// The reply echoes the command name the client used, so a
/// `capture_fingerprint` request gets a `capture_fingerprint` reply.
pub async fn handle_text(dispatcher: &Dispatcher, text: &str) -> Value {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return invalid_json();
    };
    let echoed = frame
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let command = match Command::parse(&frame) {
        Ok(command) => command,
        Err(DispatchError::InvalidJson) => return invalid_json(),
        Err(e) => {
            debug!(command = %echoed, error = %e, "Rejected frame");
            return json!({"command": echoed, "success": false, "message": e.to_string()});
        }
    };

    match dispatcher.dispatch(command).await {
        Ok(outcome) => render(&echoed, outcome),
        Err(e) => {
            error!(command = %echoed, error = %e, "Command failed");
            json!({"command": echoed, "success": false, "message": format!("Server error: {e}")})
        }
    }
}

fn invalid_json() -> Value {
    json!({"success": false, "message": DispatchError::InvalidJson.to_string()})
}

#[derive(Serialize)]
struct CaptureFrame<'a> {
    command: &'a str,
    success: bool,
    #[serde(flatten)]
    fields: CaptureFields,
    template_data: &'a [u8],
    template_length: usize,
}

fn render(command: &str, outcome: CommandOutcome) -> Value {
    match outcome {
        CommandOutcome::Test { device, server } => json!({
            "command": command,
            "success": true,
            "message": "ZK9500 Service is running",
            "server_info": {
                "hostname": server.hostname,
                "ip": server.ip,
                "platform": server.platform,
                "connected_clients": server.connected_clients,
            },
            "device_info": device,
        }),
        CommandOutcome::Connect { outcome, device } => json!({
            "command": command,
            "success": outcome.is_connected(),
            "message": outcome.message(),
            "device_info": device,
        }),
        CommandOutcome::Disconnect => json!({
            "command": command,
            "success": true,
            "message": "Disconnected from ZK9500",
        }),
        CommandOutcome::Capture(CaptureResult::Success(capture)) => {
            let frame = CaptureFrame {
                command,
                success: true,
                fields: CaptureFields::from(&capture),
                template_data: &capture.template,
                template_length: capture.template_len(),
            };
            serde_json::to_value(frame).unwrap_or_else(|e| {
                json!({"command": command, "success": false, "message": format!("Server error: {e}")})
            })
        }
        CommandOutcome::Capture(CaptureResult::Failure(failure)) => json!({
            "command": command,
            "success": false,
            "message": failure.message,
            "error": failure.message,
            "status_code": failure.kind.status_code(),
        }),
        CommandOutcome::Status { device, server } => json!({
            "command": command,
            "success": true,
            "device_info": device,
            "server_info": {
                "hostname": server.hostname,
                "ip": server.ip,
                "connected_clients": server.connected_clients,
                "uptime_secs": server.uptime_secs,
            },
        }),
    }
}
