use crate::hub::{PresenceHandle, PresenceHub};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::sweeper::{Sweeper, SweeperHandle};
use anyhow::{Context, Result};
use chatroom_core::{GatewayConfig, PresenceConfig};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// Gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    presence: PresenceConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, presence: PresenceConfig) -> Self {
        Self { config, presence }
    }

    /// Bind the listener and start the presence hub and sweeper
    pub async fn bind(self) -> Result<BoundGateway> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let (presence, hub_task) = PresenceHub::spawn(&self.presence);
        let sweeper = Sweeper::spawn(presence.clone(), self.presence.sweep_interval());

        Ok(BoundGateway {
            listener,
            presence,
            sweeper,
            hub_task,
            handshake: Arc::new(HandshakePolicy {
                ws_path: self.config.ws_path,
                allowed_origin: self.config.allowed_origin,
            }),
        })
    }
}

/// A gateway whose listener is bound but not yet accepting
pub struct BoundGateway {
    listener: TcpListener,
    presence: PresenceHandle,
    sweeper: SweeperHandle,
    hub_task: JoinHandle<()>,
    handshake: Arc<HandshakePolicy>,
}

impl BoundGateway {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Listener has no local address")
    }

    /// Accept connections until the hub stops
    pub async fn serve(mut self) -> Result<()> {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(
                "Gateway listening on ws://{}{}",
                addr,
                self.handshake.ws_path
            );
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let presence = self.presence.clone();
                        let handshake = self.handshake.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr.to_string(), presence, handshake).await
                            {
                                tracing::error!("Connection error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                    }
                },
                _ = &mut self.hub_task => {
                    self.sweeper.cancel();
                    anyhow::bail!("presence hub stopped unexpectedly");
                }
            }
        }
    }
}

/// Which handshakes are accepted
#[derive(Debug)]
struct HandshakePolicy {
    ws_path: String,
    allowed_origin: Option<String>,
}

impl HandshakePolicy {
    fn check(&self, request: &Request) -> Result<(), ErrorResponse> {
        if request.uri().path() != self.ws_path {
            return Err(reject(StatusCode::NOT_FOUND, "Unknown path"));
        }

        if let Some(allowed) = &self.allowed_origin {
            let origin = request
                .headers()
                .get("origin")
                .and_then(|v| v.to_str().ok());
            if origin != Some(allowed.as_str()) {
                return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
            }
        }

        Ok(())
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

// Handle a WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: String,
    presence: PresenceHandle,
    handshake: Arc<HandshakePolicy>,
) -> Result<()> {
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        handshake.check(request)?;
        Ok(response)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("WebSocket handshake failed")?;

    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket session {} established from {}", session_id, addr);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    presence.attach(session_id.clone(), outbound_tx);

    let result = pump(ws_stream, &session_id, &presence, outbound_rx).await;

    // Exactly one disconnect per session, however the pump ended
    presence.disconnect(session_id.clone());
    tracing::info!("Session {} closed", session_id);
    result
}

/// Shuttle inbound frames to the hub and outbound events to the socket
async fn pump(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    session_id: &str,
    presence: &PresenceHandle,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerEvent>,
) -> Result<()> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(presence, session_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on session {}: {}", session_id, e);
                        break;
                    }
                }
            }

            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        let text = serde_json::to_string(&event)?;
                        ws_sender
                            .send(Message::Text(text.into()))
                            .await
                            .context("Failed to write event")?;
                    }
                    None => {
                        tracing::debug!("Outbound queue for session {} closed", session_id);
                        let _ = ws_sender.close().await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Route one inbound text frame
fn dispatch(presence: &PresenceHandle, session_id: &str, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::UserJoin(username)) => presence.join(session_id, username),
        Ok(ClientEvent::UserHeartbeat(username)) => presence.heartbeat(session_id, username),
        Ok(ClientEvent::UsersOnline) => presence.request_online_users(session_id),
        Err(e) => {
            tracing::debug!("Ignoring malformed frame from {}: {}", session_id, e);
        }
    }
}
