//! Transport seam between the session controller and the remote peer.
//!
//! A [`Connector`] opens a [`Link`]: a pair of queues plus a close handle. The
//! controller never sees sockets or provider envelopes, which keeps it
//! testable with an in-memory peer.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DuplexError, Result};
use crate::protocol::{ClientMessage, ServerMessage, SessionSetup};

/// Something that happened on an open link.
#[derive(Debug)]
pub enum LinkEvent {
    /// A message from the remote peer.
    Message(ServerMessage),
    /// The peer closed the link, with its reason if it gave one.
    Closed(Option<String>),
    /// The link broke.
    Error(DuplexError),
}

/// Closes the underlying connection once.
pub struct LinkCloser(Option<Box<dyn FnOnce() + Send>>);

impl LinkCloser {
    /// Wrap a close action.
    pub fn new(close: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(close)))
    }

    /// A closer that does nothing.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Run the close action. Returns `false` if it already ran.
    pub fn close(&mut self) -> bool {
        match self.0.take() {
            Some(close) => {
                close();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for LinkCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCloser").field("armed", &self.0.is_some()).finish()
    }
}

/// An open duplex link, as seen by the session.
#[derive(Debug)]
pub struct Link {
    /// Messages to the remote peer. Shared by the capture pipeline and the controller.
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Events from the remote peer.
    pub inbound: mpsc::Receiver<LinkEvent>,
    /// Close handle.
    pub closer: LinkCloser,
}

/// The transport's end of a [`Link`].
#[derive(Debug)]
pub struct LinkPeer {
    /// Messages the session wants delivered.
    pub outbound: mpsc::Receiver<ClientMessage>,
    /// Where to push events for the session.
    pub inbound: mpsc::Sender<LinkEvent>,
}

impl Link {
    /// Create a link and the transport end that services it.
    ///
    /// `outbound_capacity` bounds the queue capture frames are pushed onto.
    pub fn channel(outbound_capacity: usize, closer: LinkCloser) -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(64);
        (
            Link { outbound: out_tx, inbound: in_rx, closer },
            LinkPeer { outbound: out_rx, inbound: in_tx },
        )
    }
}

impl LinkPeer {
    /// Deliver a server message to the session.
    pub async fn deliver(&self, message: ServerMessage) -> Result<()> {
        self.send(LinkEvent::Message(message)).await
    }

    /// Push any link event to the session.
    pub async fn send(&self, event: LinkEvent) -> Result<()> {
        self.inbound.send(event).await.map_err(|_| DuplexError::SessionClosed)
    }
}

/// Opens links to a remote speech endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and send `setup`.
    ///
    /// Returns as soon as the link is open. The setup acknowledgment arrives
    /// later as an inbound message.
    async fn connect(&self, setup: SessionSetup, outbound_capacity: usize) -> Result<Link>;
}
