//! Conversation surfaces.
//!
//! A surface is one place in the host application that talks to the remote
//! peer: an assistant button, a tutor screen, a live studio. It owns the
//! microphone and speaker slot, so at most one of its sessions is live at a
//! time.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::devices::MediaDevices;
use crate::error::Result;
use crate::session::{AudioSession, NoOpObserver, SessionObserver, SessionState};
use crate::tools::ToolRegistry;
use crate::transport::Connector;

/// A configured entry point that starts sessions one at a time.
pub struct ConversationSurface {
    name: String,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn MediaDevices>,
    tools: ToolRegistry,
    observer: Arc<dyn SessionObserver>,
    current: Mutex<Option<Arc<AudioSession>>>,
}

impl std::fmt::Debug for ConversationSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSurface")
            .field("name", &self.name)
            .field("voice", &self.config.voice)
            .field("tools", &self.tools)
            .finish()
    }
}

impl ConversationSurface {
    /// Create a surface.
    pub fn new(
        name: impl Into<String>,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            devices,
            tools: ToolRegistry::new(),
            observer: Arc::new(NoOpObserver),
            current: Mutex::new(None),
        }
    }

    /// Set the tool table every session on this surface exposes.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the observer every session on this surface reports to.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session currently holding the slot, live or not.
    pub async fn current(&self) -> Option<Arc<AudioSession>> {
        self.current.lock().await.clone()
    }

    /// Whether a session on this surface is connecting or active.
    pub async fn is_live(&self) -> bool {
        self.current.lock().await.as_ref().is_some_and(|s| {
            matches!(s.state(), SessionState::Connecting | SessionState::Active)
        })
    }

    /// Start a fresh session from the surface configuration.
    ///
    /// Any previous session is fully torn down first.
    pub async fn start(&self) -> Result<Arc<AudioSession>> {
        let session = AudioSession::builder()
            .config(self.config.clone())
            .shared_connector(self.connector.clone())
            .shared_devices(self.devices.clone())
            .tools(self.tools.clone())
            .shared_observer(self.observer.clone())
            .build()?;
        self.start_session(session).await
    }

    /// Start a caller-built session in this surface's slot.
    pub async fn start_session(&self, session: AudioSession) -> Result<Arc<AudioSession>> {
        let mut slot = self.current.lock().await;
        if let Some(previous) = slot.take() {
            tracing::info!(surface = %self.name, session_id = %previous.id(), "replacing session");
            previous.stop().await;
        }

        let session = Arc::new(session);
        *slot = Some(session.clone());
        session.start().await?;
        Ok(session)
    }

    /// Stop the current session, if any.
    pub async fn stop(&self) {
        let session = self.current.lock().await.take();
        if let Some(session) = session {
            session.stop().await;
        }
    }
}
