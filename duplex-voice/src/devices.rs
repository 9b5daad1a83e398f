//! Device seam: microphone, camera and speaker.
//!
//! The session acquires everything through [`MediaDevices`] so the platform
//! backend (see the `desktop` module) can be swapped for in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::{AudioChunk, AudioFrame};
use crate::error::{DuplexError, Result};

/// Identifies one scheduled playback source.
pub type SourceId = u64;

/// Receives capture windows on the platform audio thread.
pub type CaptureSink = Box<dyn FnMut(AudioFrame<'_>) + Send + 'static>;

/// Where output contexts report sources that finished playing.
pub type EndedSender = mpsc::UnboundedSender<SourceId>;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A hardware track that must be released when the session ends.
pub trait MediaTrack: Send {
    /// The track kind.
    fn kind(&self) -> TrackKind;

    /// Stop the track and release the device. Called once during teardown.
    fn stop(&mut self);
}

/// The input audio context.
///
/// Runs at the capture device's native rate. Windows are delivered to the
/// attached sink from the platform audio thread.
pub trait CaptureContext: Send {
    /// Native capture rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Start delivering windows to `sink`.
    fn attach(&mut self, sink: CaptureSink) -> Result<()>;

    /// Stop delivering windows and release the context.
    fn close(&mut self) -> Result<()>;
}

/// An acquired microphone.
pub struct Microphone {
    /// The input context windows come from.
    pub context: Box<dyn CaptureContext>,
    /// Tracks backing the context.
    pub tracks: Vec<Box<dyn MediaTrack>>,
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("sample_rate", &self.context.sample_rate())
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// A camera that can produce still frames on demand.
#[async_trait]
pub trait CameraTrack: MediaTrack {
    /// Grab the current frame as JPEG bytes.
    async fn capture_jpeg(&mut self) -> Result<Vec<u8>>;
}

/// The output audio context.
///
/// Owns a monotonic clock in seconds and plays sources at absolute times on
/// that clock. Every source that plays to the end is reported on the
/// [`EndedSender`] given at open time. Stopped sources may or may not be
/// reported.
pub trait OutputContext: Send {
    /// Output rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Current clock position in seconds.
    fn current_time(&self) -> f64;

    /// Start `chunk` at clock time `at`.
    fn start_source(&mut self, id: SourceId, chunk: AudioChunk, at: f64) -> Result<()>;

    /// Stop a source. Stopping a finished or unknown source is a no-op.
    fn stop_source(&mut self, id: SourceId);

    /// Release the context. Later calls are harmless.
    fn close(&mut self) -> Result<()>;
}

/// Platform media provider.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the default microphone.
    async fn open_microphone(&self) -> Result<Microphone>;

    /// Acquire the default camera.
    async fn open_camera(&self) -> Result<Box<dyn CameraTrack>> {
        Err(DuplexError::device("no camera available"))
    }

    /// Open an output context running at `sample_rate`.
    async fn open_output(
        &self,
        sample_rate: u32,
        ended: EndedSender,
    ) -> Result<Box<dyn OutputContext>>;
}
