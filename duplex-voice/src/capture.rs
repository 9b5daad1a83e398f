//! Capture and encode pipeline.
//!
//! Turns microphone windows into base64 PCM16 frames at the rate the remote
//! peer expects and pushes them onto the outbound queue without ever blocking
//! the platform audio thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::{AudioFormat, AudioFrame, float_to_pcm16, to_base64};
use crate::playback::PlaybackMonitor;
use crate::protocol::{ClientMessage, MediaBlob};

/// Resample by nearest-neighbour picking.
///
/// Output index `i` takes input index `round(i * input_rate / output_rate)`,
/// clamped to the last input sample. The output holds
/// `floor(len * output_rate / input_rate)` samples.
///
/// This is a cheap, lossy resampler with no anti-aliasing filter. Energy above
/// the new Nyquist frequency folds back into the band. Speech stays
/// intelligible, which is all the remote recognizer needs, but it is not
/// suitable for music or archival audio.
///
/// The function is pure: the same input and rates always produce the same
/// output.
pub fn downsample(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == 0 || output_rate == 0 || input.is_empty() {
        return Vec::new();
    }
    if input_rate == output_rate {
        return input.to_vec();
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let out_len = (input.len() as u64 * output_rate as u64 / input_rate as u64) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let src = (i as f64 * ratio).round() as usize;
            input[src.min(last)]
        })
        .collect()
}

/// Resample, quantize and base64-encode one capture window.
pub fn encode_window(frame: AudioFrame<'_>, target_rate: u32) -> MediaBlob {
    let resampled = downsample(frame.samples, frame.sample_rate, target_rate);
    MediaBlob {
        data: to_base64(&float_to_pcm16(&resampled)),
        mime_type: AudioFormat::pcm16(target_rate).mime_type(),
    }
}

/// What happened to one capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Encoded and queued for sending.
    Sent,
    /// Dropped because remote audio was playing.
    Suppressed,
    /// Encoded but the outbound queue was full or closed.
    SendFailed,
}

/// Counters describing the capture pipeline's activity.
#[derive(Debug, Default)]
pub struct CaptureStats {
    sent: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
}

impl CaptureStats {
    /// Frames queued for sending.
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Windows dropped by the echo guard.
    pub fn frames_suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Frames lost to a full or closed queue.
    pub fn send_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Per-session capture pipeline.
///
/// Runs on whatever thread delivers capture windows. The only shared state it
/// reads is the playback monitor's speaking flag.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    target_rate: u32,
    monitor: Arc<PlaybackMonitor>,
    outbound: mpsc::Sender<ClientMessage>,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    /// Create a pipeline that sends to `outbound`.
    pub fn new(
        target_rate: u32,
        monitor: Arc<PlaybackMonitor>,
        outbound: mpsc::Sender<ClientMessage>,
    ) -> Self {
        Self { target_rate, monitor, outbound, stats: Arc::new(CaptureStats::default()) }
    }

    /// Count into `stats` instead of a fresh set of counters.
    pub fn with_stats(mut self, stats: Arc<CaptureStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Shared counters for this pipeline.
    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Frames queued for sending so far.
    pub fn frames_sent(&self) -> u64 {
        self.stats.frames_sent()
    }

    /// Windows that never reached the link, whether muted or lost to the queue.
    pub fn frames_dropped(&self) -> u64 {
        self.stats.frames_suppressed() + self.stats.send_failures()
    }

    /// Handle one capture window.
    ///
    /// Sending is fire-and-forget: a full or closed queue loses the frame,
    /// since the microphone keeps producing fresh audio anyway.
    pub fn process_window(&self, frame: AudioFrame<'_>) -> CaptureOutcome {
        if self.monitor.is_speaking() {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            return CaptureOutcome::Suppressed;
        }

        let blob = encode_window(frame, self.target_rate);
        match self.outbound.try_send(ClientMessage::Media(blob)) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                CaptureOutcome::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("outbound queue full, dropping capture frame");
                CaptureOutcome::SendFailed
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("outbound queue closed, dropping capture frame");
                CaptureOutcome::SendFailed
            }
        }
    }
}
