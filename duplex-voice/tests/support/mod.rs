//! In-memory devices and transport for driving sessions in tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use duplex_voice::devices::{CameraTrack, CaptureSink, EndedSender, MediaTrack, SourceId, TrackKind};
use duplex_voice::protocol::FunctionResponse;
use duplex_voice::{
    AudioChunk, AudioFrame, CaptureContext, ClientMessage, Connector, DuplexError, Link,
    LinkPeer, MediaDevices, Microphone, OutputContext, Result, SessionSetup,
};
use duplex_voice::transport::LinkCloser;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Release events from every fake, in the order they happened.
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

pub const LINK_CLOSED: &str = "link closed";
pub const SOURCE_STOPPED: &str = "source stopped";
pub const OUTPUT_CLOSED: &str = "output closed";
pub const INPUT_CLOSED: &str = "input closed";
pub const TRACK_STOPPED: &str = "track stopped";
pub const CAMERA_STOPPED: &str = "camera stopped";

// ── Transport ───────────────────────────────────────────────────────────

/// Hands every opened link's peer end to the test.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<LinkPeer>,
    setups: Arc<Mutex<Vec<SessionSetup>>>,
    closes: Arc<AtomicUsize>,
    journal: Journal,
    refuse: bool,
}

/// The test's view of a [`MockConnector`].
pub struct ConnectorRig {
    pub peers: mpsc::UnboundedReceiver<LinkPeer>,
    pub setups: Arc<Mutex<Vec<SessionSetup>>>,
    pub closes: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, ConnectorRig) {
        Self::journaled(Journal::default())
    }

    /// Record link closes into `journal`.
    pub fn journaled(journal: Journal) -> (Self, ConnectorRig) {
        let (tx, rx) = mpsc::unbounded_channel();
        let setups = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Self { peers: tx, setups: setups.clone(), closes: closes.clone(), journal, refuse: false },
            ConnectorRig { peers: rx, setups, closes },
        )
    }

    /// Fail every connect attempt.
    pub fn refusing() -> (Self, ConnectorRig) {
        let (mut connector, rig) = Self::new();
        connector.refuse = true;
        (connector, rig)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, setup: SessionSetup, outbound_capacity: usize) -> Result<Link> {
        if self.refuse {
            return Err(DuplexError::connection("connection refused"));
        }
        self.setups.lock().push(setup);
        let closes = self.closes.clone();
        let journal = self.journal.clone();
        let (link, peer) = Link::channel(
            outbound_capacity,
            LinkCloser::new(move || {
                closes.fetch_add(1, Ordering::SeqCst);
                journal.lock().push(LINK_CLOSED);
            }),
        );
        self.peers.send(peer).map_err(|_| DuplexError::connection("test dropped the connector rig"))?;
        Ok(link)
    }
}

impl ConnectorRig {
    /// The peer end of the most recent link.
    pub async fn next_peer(&mut self) -> LinkPeer {
        tokio::time::timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("no link opened in time")
            .expect("connector dropped")
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Read outbound messages until `n` tool responses have arrived.
pub async fn collect_responses(peer: &mut LinkPeer, n: usize) -> Vec<FunctionResponse> {
    let mut responses = Vec::new();
    while responses.len() < n {
        let message = tokio::time::timeout(Duration::from_secs(5), peer.outbound.recv())
            .await
            .expect("timed out waiting for tool responses")
            .expect("outbound closed");
        if let ClientMessage::FunctionResponses(response) = message {
            responses.push(response);
        }
    }
    responses
}

/// Drain whatever is queued outbound right now.
pub fn drain(peer: &mut LinkPeer) -> Vec<ClientMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = peer.outbound.try_recv() {
        messages.push(message);
    }
    messages
}

// ── Devices ─────────────────────────────────────────────────────────────

/// Everything the fake devices record.
#[derive(Default)]
pub struct DeviceRig {
    pub deny_microphone: AtomicBool,
    pub fail_output: AtomicBool,
    pub has_camera: AtomicBool,
    pub camera_stops: AtomicUsize,
    pub microphones_opened: AtomicUsize,
    pub capture_closes: AtomicUsize,
    pub track_stops: AtomicUsize,
    pub output_closes: AtomicUsize,
    pub sink: Mutex<Option<CaptureSink>>,
    pub clock: Mutex<f64>,
    pub starts: Mutex<Vec<(SourceId, f64, f64)>>,
    pub stopped: Mutex<Vec<SourceId>>,
    pub ended: Mutex<Option<EndedSender>>,
    pub journal: Journal,
}

impl DeviceRig {
    /// Fire one capture window. Returns false when no sink is attached.
    pub fn push_window(&self, samples: &[f32], sample_rate: u32) -> bool {
        match self.sink.lock().as_mut() {
            Some(sink) => {
                sink(AudioFrame::new(samples, sample_rate));
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn set_clock(&self, now: f64) {
        *self.clock.lock() = now;
    }

    /// Report a source as played to the end.
    pub fn finish(&self, id: SourceId) {
        if let Some(ended) = self.ended.lock().as_ref() {
            let _ = ended.send(id);
        }
    }

    pub fn start_times(&self) -> Vec<f64> {
        self.starts.lock().iter().map(|(_, at, _)| *at).collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Media backend whose hardware is a [`DeviceRig`].
#[derive(Clone, Default)]
pub struct MockDevices {
    pub rig: Arc<DeviceRig>,
}

impl MockDevices {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn open_microphone(&self) -> Result<Microphone> {
        if self.rig.deny_microphone.load(Ordering::SeqCst) {
            return Err(DuplexError::permission("microphone access denied"));
        }
        self.rig.microphones_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Microphone {
            context: Box::new(MockCapture { rig: self.rig.clone() }),
            tracks: vec![Box::new(MockTrack { rig: self.rig.clone() })],
        })
    }

    async fn open_camera(&self) -> Result<Box<dyn CameraTrack>> {
        if !self.rig.has_camera.load(Ordering::SeqCst) {
            return Err(DuplexError::device("no camera available"));
        }
        Ok(Box::new(MockCamera { rig: self.rig.clone() }))
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        ended: EndedSender,
    ) -> Result<Box<dyn OutputContext>> {
        if self.rig.fail_output.load(Ordering::SeqCst) {
            return Err(DuplexError::device("no output device"));
        }
        *self.rig.ended.lock() = Some(ended);
        Ok(Box::new(MockOutput { sample_rate, rig: self.rig.clone() }))
    }
}

struct MockCapture {
    rig: Arc<DeviceRig>,
}

impl CaptureContext for MockCapture {
    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn attach(&mut self, sink: CaptureSink) -> Result<()> {
        *self.rig.sink.lock() = Some(sink);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.rig.sink.lock().take();
        self.rig.capture_closes.fetch_add(1, Ordering::SeqCst);
        self.rig.journal.lock().push(INPUT_CLOSED);
        Ok(())
    }
}

struct MockTrack {
    rig: Arc<DeviceRig>,
}

impl MediaTrack for MockTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&mut self) {
        self.rig.track_stops.fetch_add(1, Ordering::SeqCst);
        self.rig.journal.lock().push(TRACK_STOPPED);
    }
}

struct MockCamera {
    rig: Arc<DeviceRig>,
}

impl MediaTrack for MockCamera {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&mut self) {
        self.rig.camera_stops.fetch_add(1, Ordering::SeqCst);
        self.rig.journal.lock().push(CAMERA_STOPPED);
    }
}

#[async_trait]
impl CameraTrack for MockCamera {
    async fn capture_jpeg(&mut self) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

struct MockOutput {
    sample_rate: u32,
    rig: Arc<DeviceRig>,
}

impl OutputContext for MockOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.rig.clock.lock()
    }

    fn start_source(&mut self, id: SourceId, chunk: AudioChunk, at: f64) -> Result<()> {
        self.rig.starts.lock().push((id, at, chunk.duration()));
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        self.rig.stopped.lock().push(id);
        self.rig.journal.lock().push(SOURCE_STOPPED);
    }

    fn close(&mut self) -> Result<()> {
        self.rig.output_closes.fetch_add(1, Ordering::SeqCst);
        self.rig.journal.lock().push(OUTPUT_CLOSED);
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Base64 PCM16 silence lasting `secs` at `rate`.
pub fn encoded_silence(secs: f64, rate: u32) -> String {
    let chunk = AudioChunk::silence(secs, rate);
    duplex_voice::audio::to_base64(&duplex_voice::audio::float_to_pcm16(&chunk.samples))
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
