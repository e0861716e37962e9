//! A mock debug hub for integration-testing the bridge client end to end.
//!
//! Grounded on `rt_test_utils::mock_ws_server::MockWsServer`: bind to port 0,
//! spawn a background accept loop, one task per connection. The handshake is
//! adapted from the forwarder/receiver hello exchange to the probe/hub
//! register/registered one, and the ack-building logic is replaced by a pair
//! of channels so test code can script arbitrary hub behavior (send rule
//! updates, breakpoint resumes, db commands) and observe whatever the probe
//! uploads.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use probe_protocol::{BridgeMessage, RegisteredPayload};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;

/// A scriptable mock hub. Accepts any number of sequential connections (the
/// bridge client reconnects onto the same address), completing the
/// register/registered handshake for each and then relaying frames between
/// the probe and test code.
pub struct MockHub {
    addr: SocketAddr,
    to_client: broadcast::Sender<BridgeMessage>,
    from_client: mpsc::UnboundedReceiver<BridgeMessage>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockHub {
    /// Start the mock hub, binding to a random available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock hub listener");
        let addr = listener.local_addr().expect("local addr");

        let (to_client, _rx) = broadcast::channel(256);
        let (from_client_tx, from_client) = mpsc::unbounded_channel();

        let to_client_for_task = to_client.clone();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, to_client_for_task, from_client_tx).await;
        });

        MockHub {
            addr,
            to_client,
            from_client,
            _task: task,
        }
    }

    /// The `ws://127.0.0.1:<port>` URL the bridge client should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a frame to the currently (or next) connected client.
    pub fn send(&self, msg: BridgeMessage) {
        let _ = self.to_client.send(msg);
    }

    /// Wait for the next frame the client sent.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.from_client.recv().await
    }

    async fn accept_loop(
        listener: TcpListener,
        to_client: broadcast::Sender<BridgeMessage>,
        from_client: mpsc::UnboundedSender<BridgeMessage>,
    ) {
        loop {
            let (stream, _peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let to_client = to_client.clone();
            let from_client = from_client.clone();
            tokio::spawn(async move {
                let _ = Self::handle_connection(stream, to_client, from_client).await;
            });
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        to_client: broadcast::Sender<BridgeMessage>,
        from_client: mpsc::UnboundedSender<BridgeMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();

        // First frame from the probe must be `register`; everything else
        // before that is a protocol violation the test never expects.
        let registered = loop {
            match read.next().await {
                Some(Ok(Message::Text(t))) => {
                    match serde_json::from_str::<BridgeMessage>(&t) {
                        Ok(BridgeMessage::Register(_)) => {
                            break RegisteredPayload {
                                session_id: uuid::Uuid::new_v4().to_string(),
                            };
                        }
                        _ => continue,
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Box::new(e)),
                None => return Ok(()),
            }
        };

        let json = serde_json::to_string(&BridgeMessage::Registered(registered))?;
        write.send(Message::Text(json.into())).await?;

        let mut outbound = to_client.subscribe();
        loop {
            tokio::select! {
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(t))) => {
                            if let Ok(msg) = serde_json::from_str::<BridgeMessage>(&t) {
                                let _ = from_client.send(msg);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Box::new(e)),
                    }
                }
                outgoing = outbound.recv() => {
                    match outgoing {
                        Ok(msg) => {
                            let json = serde_json::to_string(&msg)?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
}
