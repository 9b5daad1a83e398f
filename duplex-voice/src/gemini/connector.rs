//! WebSocket connector for the Gemini Live API.

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::GEMINI_LIVE_URL;
use super::wire;
use crate::error::{DuplexError, Result};
use crate::protocol::{ClientMessage, SessionSetup};
use crate::transport::{Connector, Link, LinkCloser, LinkEvent, LinkPeer};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSource = SplitStream<WsStream>;

/// Opens Gemini Live sessions over a WebSocket.
///
/// Each link runs two tasks: a writer that wraps outbound messages in Gemini
/// envelopes, and a reader that parses server frames into [`LinkEvent`]s.
#[derive(Clone)]
pub struct GeminiConnector {
    api_key: SecretString,
    url: String,
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector").field("url", &self.url).finish()
    }
}

impl GeminiConnector {
    /// Create a connector for the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: SecretString::from(api_key.into()), url: GEMINI_LIVE_URL.to_string() }
    }

    /// Read the key from `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| DuplexError::config("GOOGLE_API_KEY or GEMINI_API_KEY must be set"))?;
        Ok(Self::new(key))
    }

    /// Point at a different endpoint, e.g. a local relay.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request_url(&self) -> String {
        let key = self.api_key.expose_secret();
        if key.is_empty() {
            self.url.clone()
        } else {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{}key={}", self.url, separator, key)
        }
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self, setup: SessionSetup, outbound_capacity: usize) -> Result<Link> {
        let request = self.request_url().into_client_request().map_err(|e| {
            DuplexError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| DuplexError::connection(format!("WebSocket connect error: {}", e)))?;
        let (mut sink, source) = stream.split();

        let frame = wire::encode(&wire::setup_message(&setup))?;
        tracing::info!(model_id = %setup.model, tools = setup.tools.len(), "Sending setup message");
        tracing::debug!(raw_setup = %frame, "Raw setup message");
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| DuplexError::connection(format!("Send error: {}", e)))?;

        let (close_tx, close_rx) = oneshot::channel();
        let (link, peer) = Link::channel(outbound_capacity, LinkCloser::noop());
        let LinkPeer { outbound, inbound } = peer;

        tokio::spawn(write_loop(sink, outbound, inbound.clone(), close_rx));
        let reader = tokio::spawn(read_loop(source, inbound));

        let closer = LinkCloser::new(move || {
            let _ = close_tx.send(());
            reader.abort();
        });
        Ok(Link { closer, ..link })
    }
}

/// Forward outbound messages until the session closes the link.
///
/// A failed send is reported to the session as a connection error.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::Sender<LinkEvent>,
    mut close: oneshot::Receiver<()>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            _ = &mut close => break,
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let kind = message.kind();
                let frame = match wire::encode(&wire::client_message(message)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, kind, "dropping unencodable message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, kind, "Send error, stopping writer");
                    let error = DuplexError::connection(format!("Send error: {}", e));
                    let _ = inbound.send(LinkEvent::Error(error)).await;
                    return;
                }
                tracing::trace!(kind, "sent message");
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
}

async fn read_loop(mut source: WsSource, inbound: mpsc::Sender<LinkEvent>) {
    loop {
        let event = match source.next().await {
            Some(Ok(Message::Text(text))) => parse(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => parse(text),
                Err(e) => LinkEvent::Error(DuplexError::protocol(format!(
                    "Invalid UTF-8 in binary message: {}",
                    e
                ))),
            },
            Some(Ok(Message::Close(frame))) => {
                LinkEvent::Closed(frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => LinkEvent::Error(DuplexError::connection(format!("Receive error: {}", e))),
            None => LinkEvent::Closed(None),
        };

        let terminal = !matches!(event, LinkEvent::Message(_));
        if inbound.send(event).await.is_err() || terminal {
            break;
        }
    }
}

fn parse(raw: &str) -> LinkEvent {
    match wire::decode(raw) {
        Ok(message) => LinkEvent::Message(message),
        Err(e) => LinkEvent::Error(e),
    }
}
