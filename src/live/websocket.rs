//! WebSocket connector for the live endpoint

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::{ClientMessage, ServerMessage, SessionSetup, TransportEvent};
use super::transport::{Connector, LiveLink};
use crate::config::LiveConfig;
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered ahead of the receive loop
const INBOUND_QUEUE: usize = 64;

/// Connects to the live endpoint over a WebSocket
pub struct WebSocketConnector {
    endpoint: Url,
    api_key: Option<SecretString>,
    handshake_timeout: Duration,
    outbound_queue: usize,
}

impl WebSocketConnector {
    /// Build a connector from session configuration
    ///
    /// # Errors
    ///
    /// Returns a config error if the endpoint is not a valid URL
    pub fn from_config(config: &LiveConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;

        if config.api_key.is_none() {
            tracing::warn!("no API key configured (set GEMINI_API_KEY)");
        }

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone().map(SecretString::from),
            handshake_timeout: config.handshake_timeout,
            outbound_queue: config.outbound_queue.max(1),
        })
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }
        url
    }

    async fn handshake(&self, setup: &SessionSetup) -> Result<Socket> {
        let (mut socket, _response) = tokio_tungstenite::connect_async(self.request_url().as_str())
            .await
            .map_err(|e| Error::Connection(format!("failed to connect: {e}")))?;

        tracing::debug!(endpoint = %self.endpoint, "websocket connected, sending setup");

        let frame = serde_json::to_string(&ClientMessage::setup(setup))?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::Connection(format!("failed to send setup: {e}")))?;

        await_setup_complete(&mut socket).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink> {
        let socket = tokio::time::timeout(self.handshake_timeout, self.handshake(setup))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "setup handshake timed out after {}s",
                    self.handshake_timeout.as_secs()
                ))
            })??;

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(stream, inbound_tx));

        Ok(LiveLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            writer: Some(writer),
            tasks: vec![reader],
        })
    }
}

/// Wait for `setupComplete`, skipping anything else
async fn await_setup_complete(socket: &mut Socket) -> Result<()> {
    while let Some(frame) = socket.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => parse(text.as_bytes()),
            Ok(Message::Binary(data)) => parse(&data),
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(Error::Connection(format!("setup rejected: {reason}")));
            }
            Ok(_) => continue,
            Err(e) => return Err(Error::Connection(format!("handshake failed: {e}"))),
        };

        match message {
            Some(message) if message.setup_complete.is_some() => return Ok(()),
            Some(_) => tracing::debug!("ignoring frame received before setup completed"),
            None => {}
        }
    }

    Err(Error::Connection("connection closed during setup".to_string()))
}

/// Forward queued frames until the sender is dropped, then close
async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::Receiver<ClientMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize outbound frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(error = %e, "websocket write failed");
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    tracing::debug!("websocket writer stopped");
}

/// Forward parsed frames until the stream ends
async fn read_loop(mut stream: SplitStream<Socket>, inbound: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => parse(text.as_bytes()).map(TransportEvent::Message),
            Ok(Message::Binary(data)) => parse(&data).map(TransportEvent::Message),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                let _ = inbound.send(TransportEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => None,
            Err(e) => {
                let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        if let Some(event) = event {
            if inbound.send(event).await.is_err() {
                return;
            }
        }
    }

    let _ = inbound.send(TransportEvent::Closed { reason: None }).await;
}

fn parse(data: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice(data) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, bytes = data.len(), "skipping unparseable server frame");
            None
        }
    }
}
