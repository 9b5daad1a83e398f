//! Duplex session controller.
//!
//! An [`AudioSession`] owns one live conversation: microphone, speaker, the
//! link to the remote peer, and a driver task that routes everything between
//! them.
//!
//! ```text
//!   mic ──► CapturePipeline ──► outbound queue ──► Connector link ──► peer
//!                 ▲                                                    │
//!        PlaybackMonitor                                               │
//!                 │                                                    ▼
//!   speaker ◄── PlaybackScheduler ◄── driver task ◄── inbound events ◄─┘
//!                                        │   ▲
//!                                        ▼   │
//!                                    ToolRegistry
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_voice::{AudioSession, SessionConfig, SessionState, ToolDefinition};
//!
//! let session = AudioSession::builder()
//!     .config(SessionConfig::new().with_voice("Kore"))
//!     .connector(connector)
//!     .devices(devices)
//!     .tool_fn(ToolDefinition::new("navigate"), |call| Ok(call.args.clone()))
//!     .build()?;
//!
//! session.start().await?;
//! session.wait_for(|s| *s == SessionState::Active).await?;
//! // ... talk ...
//! session.stop().await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::audio::{AudioFrame, JPEG_MIME_TYPE, to_base64};
use crate::capture::{CapturePipeline, CaptureStats};
use crate::config::{SessionConfig, ToolDefinition};
use crate::devices::{CameraTrack, CaptureContext, MediaDevices, MediaTrack, SourceId};
use crate::error::{DuplexError, Result};
use crate::playback::{PlaybackMonitor, PlaybackScheduler, decode_chunk};
use crate::protocol::{ClientMessage, FunctionResponse, ServerMessage, SessionSetup, ToolInvocation};
use crate::tools::{ToolHandler, ToolRegistry};
use crate::transcript::{Speaker, TranscriptCoalescer, TranscriptEntry};
use crate::transport::{Connector, LinkCloser, LinkEvent};

/// Lifecycle state of an [`AudioSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, not started.
    Idle,
    /// Devices acquired, waiting for the peer to acknowledge setup.
    Connecting,
    /// Streaming in both directions.
    Active,
    /// Tearing down.
    Closing,
    /// Ended normally.
    Closed,
    /// Ended by a failure.
    Errored,
}

impl SessionState {
    /// Whether the session has ended for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callbacks for the host application.
///
/// All methods default to no-ops. Errors returned from a callback are logged
/// and otherwise ignored.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// Called after every state transition.
    async fn on_state_change(&self, _state: SessionState) -> Result<()> {
        Ok(())
    }

    /// Called when a transcript entry is created, extended or finalized.
    async fn on_transcript(&self, _entry: &TranscriptEntry) -> Result<()> {
        Ok(())
    }

    /// Called before a tool invocation is dispatched.
    async fn on_tool_call(&self, _call: &ToolInvocation) -> Result<()> {
        Ok(())
    }

    /// Called when the session fails.
    async fn on_error(&self, _error: &DuplexError) -> Result<()> {
        Ok(())
    }
}

/// Default no-op observer.
#[derive(Debug, Clone, Default)]
pub struct NoOpObserver;

#[async_trait]
impl SessionObserver for NoOpObserver {}

/// Builder for [`AudioSession`].
pub struct AudioSessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    devices: Option<Arc<dyn MediaDevices>>,
    tools: ToolRegistry,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Default for AudioSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            connector: None,
            devices: None,
            tools: ToolRegistry::new(),
            observer: None,
        }
    }

    /// Set the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    /// Set the transport.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Set a shared transport.
    pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the media backend.
    pub fn devices(mut self, devices: impl MediaDevices + 'static) -> Self {
        self.devices = Some(Arc::new(devices));
        self
    }

    /// Set a shared media backend.
    pub fn shared_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Register a tool with its handler.
    pub fn tool(mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) -> Self {
        self.tools.register(definition, handler);
        self
    }

    /// Register a tool with a sync function handler.
    pub fn tool_fn<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        self.tools.register_fn(definition, handler);
        self
    }

    /// Register a tool with an async function handler.
    pub fn tool_async<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.register_async(definition, handler);
        self
    }

    /// Replace the whole tool table.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the observer.
    pub fn observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set a shared observer.
    pub fn shared_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the session (does not start it).
    pub fn build(self) -> Result<AudioSession> {
        let connector = self.connector.ok_or_else(|| DuplexError::config("Connector is required"))?;
        let devices =
            self.devices.ok_or_else(|| DuplexError::config("Media devices are required"))?;
        self.config.validate()?;

        let (state, _) = watch::channel(SessionState::Idle);
        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4().to_string(),
            state,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoOpObserver)),
            monitor: Arc::new(PlaybackMonitor::default()),
            capture_stats: Arc::new(CaptureStats::default()),
        });

        Ok(AudioSession {
            shared,
            config: self.config,
            connector,
            devices,
            tools: Arc::new(self.tools),
            inner: Mutex::new(Inner::default()),
        })
    }
}

/// State visible to both the handle and the driver.
struct Shared {
    id: String,
    state: watch::Sender<SessionState>,
    observer: Arc<dyn SessionObserver>,
    monitor: Arc<PlaybackMonitor>,
    capture_stats: Arc<CaptureStats>,
}

impl Shared {
    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    async fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev == next {
            return;
        }
        tracing::info!(session_id = %self.id, from = %prev, to = %next, "session state changed");
        if let Err(e) = self.observer.on_state_change(next).await {
            tracing::warn!(session_id = %self.id, error = %e, "observer failed on state change");
        }
    }

    async fn report(&self, error: &DuplexError) {
        tracing::error!(session_id = %self.id, error = %error, "session failed");
        if let Err(e) = self.observer.on_error(error).await {
            tracing::warn!(session_id = %self.id, error = %e, "observer failed on error");
        }
    }
}

enum Control {
    Stop,
}

#[derive(Default)]
struct Inner {
    control: Option<mpsc::Sender<Control>>,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    driver: Option<JoinHandle<()>>,
}

/// One live duplex audio conversation.
///
/// A session is single-use: once it reaches [`SessionState::Closed`] or
/// [`SessionState::Errored`] it cannot be started again. Dropping a session
/// that was not stopped aborts its driver, which still releases every device.
pub struct AudioSession {
    shared: Arc<Shared>,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn MediaDevices>,
    tools: Arc<ToolRegistry>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("id", &self.shared.id)
            .field("state", &self.shared.current())
            .field("tools", &self.tools)
            .finish()
    }
}

impl AudioSession {
    /// Create a new builder.
    pub fn builder() -> AudioSessionBuilder {
        AudioSessionBuilder::new()
    }

    /// Unique session id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The configuration this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.subscribe();
        let state = rx.wait_for(|s| predicate(s)).await.map_err(|_| DuplexError::SessionClosed)?;
        Ok(*state)
    }

    /// Whether remote audio is scheduled or playing. The microphone is muted meanwhile.
    pub fn is_speaking(&self) -> bool {
        self.shared.monitor.is_speaking()
    }

    /// Number of in-flight playback sources.
    pub fn pending_sources(&self) -> usize {
        self.shared.monitor.pending_sources()
    }

    /// Output clock time the next chunk will start at.
    pub fn next_scheduled_time(&self) -> f64 {
        self.shared.monitor.next_scheduled_time()
    }

    /// Microphone frames sent so far.
    pub fn frames_sent(&self) -> u64 {
        self.shared.capture_stats.frames_sent()
    }

    /// Microphone windows muted or lost to a full queue.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.capture_stats.frames_suppressed() + self.shared.capture_stats.send_failures()
    }

    /// Acquire devices, open the link and spawn the driver.
    ///
    /// Returns once the link is open with the session in
    /// [`SessionState::Connecting`]. It becomes [`SessionState::Active`] when
    /// the peer acknowledges the setup; use [`wait_for`](Self::wait_for) to
    /// observe that.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match self.shared.current() {
            SessionState::Idle => {}
            state if state.is_terminal() => return Err(DuplexError::SessionClosed),
            state => {
                return Err(DuplexError::invalid_state(format!("session is already {}", state)));
            }
        }

        self.shared.transition(SessionState::Connecting).await;
        let mut resources = Resources::new(self.shared.id.clone());

        match self.acquire(&mut resources).await {
            Ok((inbound, ended, outbound)) => {
                let (control_tx, control_rx) = mpsc::channel(4);
                let driver = Driver {
                    shared: self.shared.clone(),
                    tools: self.tools.clone(),
                    tool_timeout: self.config.tool_timeout,
                    output_rate: self.config.output_sample_rate,
                    input_rate: self.config.input_sample_rate,
                    video_interval: self.config.video_interval(),
                    resources,
                    outbound: outbound.clone(),
                    inbound,
                    ended,
                    control: control_rx,
                    transcript: TranscriptCoalescer::new(self.config.transcript_merge_window),
                    in_flight: FuturesUnordered::new(),
                    abort_handles: HashMap::new(),
                    video_ticker: None,
                };
                inner.control = Some(control_tx);
                inner.outbound = Some(outbound);
                inner.driver = Some(tokio::spawn(driver.run()));
                Ok(())
            }
            Err(err) => {
                resources.release();
                self.shared.report(&err).await;
                self.shared.transition(SessionState::Errored).await;
                Err(err)
            }
        }
    }

    async fn acquire(
        &self,
        resources: &mut Resources,
    ) -> Result<(mpsc::Receiver<LinkEvent>, mpsc::UnboundedReceiver<SourceId>, mpsc::Sender<ClientMessage>)>
    {
        let microphone = self.devices.open_microphone().await?;
        tracing::debug!(
            session_id = %self.shared.id,
            sample_rate = microphone.context.sample_rate(),
            "microphone acquired"
        );
        resources.capture = Some(microphone.context);
        resources.tracks = microphone.tracks;

        if self.config.video_interval().is_some() {
            resources.camera = Some(self.devices.open_camera().await?);
        }

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output = self.devices.open_output(self.config.output_sample_rate, ended_tx).await?;
        resources.scheduler = Some(PlaybackScheduler::new(
            output,
            self.config.playback_pad_secs,
            self.shared.monitor.clone(),
        ));

        let setup = SessionSetup::from_config(&self.config, self.tools.definitions());
        let link = self.connector.connect(setup, self.config.outbound_capacity).await?;
        resources.link = Some(link.closer);
        tracing::info!(session_id = %self.shared.id, model = %self.config.model, "link open");

        Ok((link.inbound, ended_rx, link.outbound))
    }

    /// Send a typed user turn.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        if self.shared.current() != SessionState::Active {
            return Err(DuplexError::invalid_state("text can only be sent while active"));
        }
        let outbound = self.inner.lock().await.outbound.clone();
        let outbound = outbound.ok_or(DuplexError::SessionClosed)?;
        outbound
            .send(ClientMessage::Text(text.into()))
            .await
            .map_err(|_| DuplexError::connection("link closed"))
    }

    /// Tear the session down.
    ///
    /// Safe to call any number of times, from any number of tasks. Every
    /// device is released exactly once.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.outbound = None;

        if let Some(control) = inner.control.take() {
            // The driver may already be gone after a remote close.
            let _ = control.send(Control::Stop).await;
        }

        if let Some(driver) = inner.driver.take() {
            if let Err(e) = driver.await {
                tracing::error!(session_id = %self.shared.id, error = %e, "driver task failed");
                self.shared.transition(SessionState::Errored).await;
            }
            return;
        }

        if self.shared.current() == SessionState::Idle {
            self.shared.transition(SessionState::Closed).await;
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        if let Some(driver) = self.inner.get_mut().driver.take() {
            driver.abort();
        }
    }
}

/// Everything acquired by a session, released in a fixed order.
struct Resources {
    session_id: String,
    link: Option<LinkCloser>,
    scheduler: Option<PlaybackScheduler>,
    capture: Option<Box<dyn CaptureContext>>,
    tracks: Vec<Box<dyn MediaTrack>>,
    camera: Option<Box<dyn CameraTrack>>,
    released: bool,
}

impl Resources {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            link: None,
            scheduler: None,
            capture: None,
            tracks: Vec::new(),
            camera: None,
            released: false,
        }
    }

    /// Close the link, stop playback, close both contexts, stop the tracks
    /// and rewind the clock. Every step runs even if an earlier one failed.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let id = &self.session_id;

        if let Some(link) = self.link.as_mut() {
            link.close();
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            let stopped = scheduler.stop_all();
            tracing::debug!(session_id = %id, stopped, "playback stopped");
            if let Err(e) = scheduler.close_output() {
                tracing::warn!(session_id = %id, error = %e, "failed to close output context");
            }
        }

        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.close() {
                tracing::warn!(session_id = %id, error = %e, "failed to close input context");
            }
        }

        for track in self.tracks.iter_mut() {
            track.stop();
        }
        if let Some(camera) = self.camera.as_mut() {
            camera.stop();
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset();
        }
        tracing::debug!(session_id = %id, "resources released");
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.release();
    }
}

type ToolFuture = Abortable<BoxFuture<'static, FunctionResponse>>;

/// The per-session task. Sole writer of state after start.
struct Driver {
    shared: Arc<Shared>,
    tools: Arc<ToolRegistry>,
    tool_timeout: Option<Duration>,
    output_rate: u32,
    input_rate: u32,
    video_interval: Option<Duration>,
    resources: Resources,
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<LinkEvent>,
    ended: mpsc::UnboundedReceiver<SourceId>,
    control: mpsc::Receiver<Control>,
    transcript: TranscriptCoalescer,
    in_flight: FuturesUnordered<ToolFuture>,
    abort_handles: HashMap<String, AbortHandle>,
    video_ticker: Option<Interval>,
}

enum Exit {
    Stopped,
    RemoteClosed(Option<String>),
    Failed(DuplexError),
}

impl Driver {
    async fn run(mut self) {
        let exit = loop {
            tokio::select! {
                command = self.control.recv() => match command {
                    Some(Control::Stop) | None => break Exit::Stopped,
                },
                event = self.inbound.recv() => match event {
                    Some(LinkEvent::Message(message)) => {
                        if let Err(err) = self.handle_message(message).await {
                            break Exit::Failed(err);
                        }
                    }
                    Some(LinkEvent::Closed(reason)) => break Exit::RemoteClosed(reason),
                    Some(LinkEvent::Error(err)) => break Exit::Failed(err),
                    None => break Exit::RemoteClosed(None),
                },
                Some(id) = self.ended.recv() => {
                    if let Some(scheduler) = self.resources.scheduler.as_mut() {
                        scheduler.on_source_ended(id);
                    }
                }
                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    if let Ok(response) = done {
                        self.send_tool_response(response).await;
                    }
                }
                _ = next_tick(&mut self.video_ticker), if self.video_ticker.is_some() => {
                    self.send_video_frame().await;
                }
            }
        };
        self.shutdown(exit).await;
    }

    async fn handle_message(&mut self, message: ServerMessage) -> Result<()> {
        if message.is_setup_complete() {
            self.activate().await?;
        }
        if self.shared.current() != SessionState::Active {
            tracing::debug!(session_id = %self.shared.id, "ignoring message before setup completed");
            return Ok(());
        }

        if let Some(content) = &message.server_content {
            if content.interrupted {
                if let Some(scheduler) = self.resources.scheduler.as_mut() {
                    let stopped = scheduler.interrupt();
                    tracing::debug!(session_id = %self.shared.id, stopped, "playback interrupted");
                }
            }

            for payload in message.audio_payloads() {
                self.play(payload);
            }

            if let Some(fragment) = &content.input_transcription {
                self.transcribe(Speaker::User, &fragment.text).await;
            }
            if let Some(fragment) = &content.output_transcription {
                self.transcribe(Speaker::Model, &fragment.text).await;
            }

            if content.turn_complete {
                for entry in self.transcript.finalize() {
                    self.notify_transcript(&entry).await;
                }
            }
        }

        if let Some(tool_call) = message.tool_call {
            for call in tool_call.function_calls {
                self.dispatch(call).await;
            }
        }

        if let Some(cancellation) = message.tool_call_cancellation {
            for id in cancellation.ids {
                if let Some(handle) = self.abort_handles.remove(&id) {
                    handle.abort();
                    tracing::debug!(session_id = %self.shared.id, id = %id, "tool call cancelled");
                }
            }
        }

        if let Some(go_away) = message.go_away {
            tracing::info!(
                session_id = %self.shared.id,
                time_left = go_away.time_left.as_deref().unwrap_or("unknown"),
                "peer will disconnect soon"
            );
        }

        Ok(())
    }

    async fn activate(&mut self) -> Result<()> {
        if self.shared.current() != SessionState::Connecting {
            return Ok(());
        }

        let pipeline =
            CapturePipeline::new(self.input_rate, self.shared.monitor.clone(), self.outbound.clone())
                .with_stats(self.shared.capture_stats.clone());
        if let Some(capture) = self.resources.capture.as_mut() {
            capture.attach(Box::new(move |frame: AudioFrame<'_>| {
                pipeline.process_window(frame);
            }))?;
        }

        if let (Some(interval), Some(_)) = (self.video_interval, self.resources.camera.as_ref()) {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.video_ticker = Some(ticker);
        }

        self.shared.transition(SessionState::Active).await;
        Ok(())
    }

    fn play(&mut self, payload: &str) {
        let Some(scheduler) = self.resources.scheduler.as_mut() else {
            return;
        };
        let chunk = match decode_chunk(payload, self.output_rate) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(session_id = %self.shared.id, error = %e, "skipping malformed audio chunk");
                return;
            }
        };
        if let Err(e) = scheduler.schedule(chunk) {
            tracing::warn!(session_id = %self.shared.id, error = %e, "failed to schedule audio chunk");
        }
    }

    async fn transcribe(&mut self, speaker: Speaker, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let entry = self.transcript.push(speaker, fragment, tokio::time::Instant::now());
        self.notify_transcript(&entry).await;
    }

    async fn notify_transcript(&mut self, entry: &TranscriptEntry) {
        if let Err(e) = self.shared.observer.on_transcript(entry).await {
            tracing::warn!(session_id = %self.shared.id, error = %e, "observer failed on transcript");
        }
    }

    async fn dispatch(&mut self, call: ToolInvocation) {
        tracing::debug!(session_id = %self.shared.id, tool = %call.name, id = %call.id, "tool call");
        if let Err(e) = self.shared.observer.on_tool_call(&call).await {
            tracing::warn!(session_id = %self.shared.id, error = %e, "observer failed on tool call");
        }

        let (handle, registration) = AbortHandle::new_pair();
        self.abort_handles.insert(call.id.clone(), handle);
        let future = self.tools.dispatch(call, self.tool_timeout);
        self.in_flight.push(Abortable::new(future, registration));
    }

    async fn send_tool_response(&mut self, response: FunctionResponse) {
        self.abort_handles.remove(&response.id);
        let (id, tool) = (response.id.clone(), response.name.clone());
        if self.outbound.send(ClientMessage::FunctionResponses(response)).await.is_err() {
            tracing::warn!(session_id = %self.shared.id, tool = %tool, id = %id, "link closed before tool result");
        }
    }

    async fn send_video_frame(&mut self) {
        let Some(camera) = self.resources.camera.as_mut() else {
            return;
        };
        match camera.capture_jpeg().await {
            Ok(jpeg) => {
                let message = ClientMessage::media(to_base64(&jpeg), JPEG_MIME_TYPE);
                if self.outbound.try_send(message).is_err() {
                    tracing::trace!(session_id = %self.shared.id, "outbound queue full, dropping video frame");
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %self.shared.id, error = %e, "camera frame failed");
            }
        }
    }

    async fn shutdown(mut self, exit: Exit) {
        self.shared.transition(SessionState::Closing).await;

        for (_, handle) in self.abort_handles.drain() {
            handle.abort();
        }
        self.in_flight.clear();
        self.video_ticker = None;
        self.resources.release();

        match exit {
            Exit::Stopped => self.shared.transition(SessionState::Closed).await,
            Exit::RemoteClosed(reason) => {
                tracing::info!(
                    session_id = %self.shared.id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "peer closed the link"
                );
                self.shared.transition(SessionState::Closed).await;
            }
            Exit::Failed(err) => {
                self.shared.report(&err).await;
                self.shared.transition(SessionState::Errored).await;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
