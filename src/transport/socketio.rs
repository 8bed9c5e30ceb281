//! Socket.IO client over WebSocket
//!
//! Speaks Engine.IO v4 / Socket.IO v5 on the default namespace, which is
//! what a Flask-SocketIO inference service expects:
//!
//! ```text
//! server  0{"sid":..,"pingInterval":..,"pingTimeout":..}   engine open
//! client  40                                                namespace connect
//! server  40{"sid":..}                                      connect ack (44{..} = refused)
//! client  42["frame","data:image/jpeg;base64,..."]         event
//! server  42["detections",{"detections":[..]}]             event
//! server  2 / client 3                                      heartbeat ping / pong
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Connector, Inbound, Link, LinkFuture};
use crate::error::{ConnectionError, SendError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Engine.IO open handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Longest silence tolerated before the connection is considered dead
    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ConnectionError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ConnectionError::Protocol("empty engine packet".to_string()))?;
        let body = chars.as_str();
        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| ConnectionError::Protocol(format!("bad open packet: {}", e))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ConnectionError::Protocol(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }

    /// Client-side encoding. Open packets are never sent by clients.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet on the default namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError(Value),
    /// Acks and binary packets, which this client never requests
    Unsupported(char),
}

impl SocketPacket {
    pub fn decode(text: &str) -> Result<Self, ConnectionError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ConnectionError::Protocol("empty socket packet".to_string()))?;
        let rest = skip_ack_id(skip_namespace(chars.as_str()));

        let data = || -> Result<Option<Value>, ConnectionError> {
            if rest.is_empty() {
                return Ok(None);
            }
            serde_json::from_str(rest)
                .map(Some)
                .map_err(|e| ConnectionError::Protocol(format!("bad packet data: {}", e)))
        };

        match kind {
            '0' => Ok(SocketPacket::Connect(data()?)),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let Some(Value::Array(mut args)) = data()? else {
                    return Err(ConnectionError::Protocol("event without arguments".to_string()));
                };
                if args.is_empty() {
                    return Err(ConnectionError::Protocol("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ConnectionError::Protocol(format!(
                            "event name is not a string: {}",
                            other
                        )))
                    }
                };
                let payload = if args.is_empty() {
                    Value::Null
                } else {
                    args.remove(0)
                };
                Ok(SocketPacket::Event { name, payload })
            }
            '4' => Ok(SocketPacket::ConnectError(data()?.unwrap_or(Value::Null))),
            '3' | '5' | '6' => Ok(SocketPacket::Unsupported(kind)),
            other => Err(ConnectionError::Protocol(format!(
                "unknown socket packet type '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self) -> Result<String, SendError> {
        match self {
            SocketPacket::Connect(None) => Ok("0".to_string()),
            SocketPacket::Connect(Some(auth)) => Ok(format!("0{}", auth)),
            SocketPacket::Disconnect => Ok("1".to_string()),
            SocketPacket::Event { name, payload } => serde_json::to_string(&(name, payload))
                .map(|args| format!("2{}", args))
                .map_err(|e| SendError::Serialize(e.to_string())),
            SocketPacket::ConnectError(data) => Ok(format!("4{}", data)),
            SocketPacket::Unsupported(kind) => Ok(kind.to_string()),
        }
    }
}

fn skip_namespace(text: &str) -> &str {
    if text.starts_with('/') {
        match text.find(',') {
            Some(comma) => &text[comma + 1..],
            None => "",
        }
    } else {
        text
    }
}

fn skip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// Build the WebSocket endpoint for a `host:port` (or http/ws URL) address.
///
/// Only plain-text transports are available, so `https://` and `wss://`
/// addresses are rejected up front.
pub fn engine_url(address: &str) -> Result<String, ConnectionError> {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("https://") || address.starts_with("wss://") {
        return Err(ConnectionError::Connect {
            url: address.to_string(),
            reason: "TLS endpoints are not supported, use a ws:// or http:// address".to_string(),
        });
    }
    let authority = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("ws://"))
        .unwrap_or(address);
    let authority = authority.split('/').next().unwrap_or(authority);
    Ok(format!("ws://{}/socket.io/?EIO=4&transport=websocket", authority))
}

/// Opens Socket.IO links over WebSocket
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    handshake_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for SocketIoConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for SocketIoConnector {
    fn open(&self, address: &str) -> LinkFuture {
        let url = engine_url(address);
        let handshake_timeout = self.handshake_timeout;
        Box::pin(async move {
            let link = SocketIoLink::connect(&url?, handshake_timeout).await?;
            Ok(Box::new(link) as Box<dyn Link>)
        })
    }
}

/// Live Socket.IO connection
pub struct SocketIoLink {
    ws: WsStream,
    heartbeat_window: Duration,
    heartbeat_deadline: Instant,
    pong_due: bool,
    closed: bool,
}

impl SocketIoLink {
    async fn connect(url: &str, handshake_timeout: Duration) -> Result<Self, ConnectionError> {
        let connect_error = |reason: String| ConnectionError::Connect {
            url: url.to_string(),
            reason,
        };

        let (mut ws, _) = time::timeout(handshake_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| connect_error("timed out".to_string()))?
            .map_err(|e| connect_error(e.to_string()))?;

        let deadline = Instant::now() + handshake_timeout;

        let handshake = loop {
            match next_engine_packet(&mut ws, deadline).await? {
                EnginePacket::Open(handshake) => break handshake,
                EnginePacket::Noop => continue,
                other => {
                    return Err(ConnectionError::Protocol(format!(
                        "expected open packet, got {:?}",
                        other
                    )))
                }
            }
        };
        debug!(
            "Engine.IO session {} (ping {}ms / timeout {}ms, max payload {:?})",
            handshake.sid, handshake.ping_interval, handshake.ping_timeout, handshake.max_payload
        );

        let connect = EnginePacket::Message(
            SocketPacket::Connect(None)
                .encode()
                .map_err(|e| ConnectionError::Protocol(e.to_string()))?,
        );
        ws.send(Message::Text(connect.encode()))
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        loop {
            match next_engine_packet(&mut ws, deadline).await? {
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect(_) => break,
                    SocketPacket::ConnectError(data) => {
                        return Err(ConnectionError::Handshake(data.to_string()))
                    }
                    other => debug!("Ignoring {:?} before namespace ack", other),
                },
                EnginePacket::Ping => {
                    ws.send(Message::Text(EnginePacket::Pong.encode()))
                        .await
                        .map_err(|e| connect_error(e.to_string()))?;
                }
                EnginePacket::Close => {
                    return Err(ConnectionError::Handshake("server closed the session".to_string()))
                }
                _ => {}
            }
        }

        info!("Socket.IO session established ({})", handshake.sid);
        let heartbeat_window = handshake.heartbeat_window();
        Ok(Self {
            ws,
            heartbeat_window,
            heartbeat_deadline: Instant::now() + heartbeat_window,
            pong_due: false,
            closed: false,
        })
    }

    async fn flush_pong(&mut self) -> Result<(), ConnectionError> {
        if self.pong_due {
            self.ws
                .send(Message::Text(EnginePacket::Pong.encode()))
                .await
                .map_err(|e| ConnectionError::Lost(e.to_string()))?;
            self.pong_due = false;
        }
        Ok(())
    }
}

#[async_trait]
impl Link for SocketIoLink {
    async fn emit(&mut self, event: &str, payload: Value) -> Result<(), SendError> {
        let packet = SocketPacket::Event {
            name: event.to_string(),
            payload,
        };
        let text = EnginePacket::Message(packet.encode()?).encode();
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| SendError::Write(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound, ConnectionError>> {
        loop {
            if self.closed {
                return None;
            }
            if let Err(e) = self.flush_pong().await {
                return Some(Err(e));
            }

            let message = match time::timeout_at(self.heartbeat_deadline, self.ws.next()).await {
                Err(_) => return Some(Err(ConnectionError::HeartbeatTimeout(self.heartbeat_window))),
                Ok(None) => return None,
                Ok(Some(Err(e))) => return Some(Err(ConnectionError::Lost(e.to_string()))),
                Ok(Some(Ok(message))) => message,
            };
            self.heartbeat_deadline = Instant::now() + self.heartbeat_window;

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return None,
                _ => continue,
            };

            let packet = match EnginePacket::decode(&text) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
            };

            match packet {
                EnginePacket::Ping => self.pong_due = true,
                EnginePacket::Close => return None,
                EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                    Ok(SocketPacket::Event { name, payload }) => {
                        return Some(Ok(Inbound {
                            event: name,
                            payload,
                        }))
                    }
                    Ok(SocketPacket::Disconnect) => return None,
                    Ok(SocketPacket::ConnectError(data)) => {
                        return Some(Err(ConnectionError::Handshake(data.to_string())))
                    }
                    Ok(other) => debug!("Ignoring {:?}", other),
                    Err(e) => warn!("Skipping undecodable socket packet: {}", e),
                },
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(disconnect) = SocketPacket::Disconnect.encode() {
            let _ = self
                .ws
                .send(Message::Text(EnginePacket::Message(disconnect).encode()))
                .await;
        }
        let _ = self.ws.close(None).await;
    }
}

async fn next_engine_packet(ws: &mut WsStream, deadline: Instant) -> Result<EnginePacket, ConnectionError> {
    loop {
        let message = time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| ConnectionError::Handshake("timed out waiting for server".to_string()))?
            .ok_or_else(|| ConnectionError::Handshake("connection closed during handshake".to_string()))?
            .map_err(|e| ConnectionError::Lost(e.to_string()))?;
        match message {
            Message::Text(text) => return EnginePacket::decode(&text),
            Message::Close(_) => {
                return Err(ConnectionError::Handshake(
                    "connection closed during handshake".to_string(),
                ))
            }
            _ => continue,
        }
    }
}
