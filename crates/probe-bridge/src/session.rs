//! Low-level WebSocket session with the hub: connect, run the
//! register/registered handshake, then send and receive framed
//! [`BridgeMessage`]s.
//!
//! Grounded directly on `forwarder::uplink::UplinkSession`: the same
//! connect-then-handshake shape and the same Bearer-header construction,
//! adapted to the probe/hub register/registered handshake in place of
//! ForwarderHello/Heartbeat.

use futures_util::{SinkExt, StreamExt};
use probe_protocol::{BridgeMessage, DeviceInfo, RegisterPayload};
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// An active, registered WebSocket session with the hub.
pub struct BridgeSession {
    ws: WsStream,
    session_id: String,
}

impl BridgeSession {
    /// Connect to `hub_url`, send `register`, and wait for `registered`.
    pub async fn connect(
        hub_url: &str,
        token: &str,
        device_info: DeviceInfo,
    ) -> Result<Self, SessionError> {
        let request = build_ws_request(hub_url, token)?;
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let mut session = BridgeSession {
            ws,
            session_id: String::new(),
        };

        session
            .send(&BridgeMessage::Register(RegisterPayload {
                device_info,
                token: token.to_owned(),
            }))
            .await?;

        match session.recv().await? {
            BridgeMessage::Registered(p) => {
                session.session_id = p.session_id;
            }
            BridgeMessage::Error(e) => {
                return Err(SessionError::Protocol(format!(
                    "hub rejected registration: {} - {}",
                    e.code, e.message
                )));
            }
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected registered, got {other:?}"
                )));
            }
        }

        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn send(&mut self, msg: &BridgeMessage) -> Result<(), SessionError> {
        let json =
            serde_json::to_string(msg).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SessionError::Ws(e.to_string()))?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<BridgeMessage, SessionError> {
        loop {
            match self.ws.next().await {
                None => return Err(SessionError::Disconnected),
                Some(Err(e)) => return Err(SessionError::Ws(e.to_string())),
                Some(Ok(msg)) => match msg {
                    Message::Text(t) => {
                        let parsed: BridgeMessage = serde_json::from_str(&t)
                            .map_err(|e| SessionError::Protocol(format!("JSON parse: {e}")))?;
                        return Ok(parsed);
                    }
                    Message::Close(_) => return Err(SessionError::Disconnected),
                    Message::Ping(data) => {
                        let _ = self.ws.send(Message::Pong(data)).await;
                        continue;
                    }
                    _ => continue,
                },
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Ws(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("websocket disconnected")]
    Disconnected,
}

fn build_ws_request(
    url: &str,
    token: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, SessionError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| SessionError::Connect(format!("invalid URL '{url}': {e}")))?;

    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}").parse().map_err(
            |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                SessionError::Connect(format!("invalid auth header: {e}"))
            },
        )?,
    );

    Ok(request)
}
