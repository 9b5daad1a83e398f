//! Gapless playback scheduling against the output clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::audio::AudioChunk;
use crate::devices::{OutputContext, SourceId};
use crate::error::{DuplexError, Result};

/// Read-only view of the scheduler shared with the capture thread and the
/// session handle.
///
/// The scheduler is the only writer.
#[derive(Debug, Default)]
pub struct PlaybackMonitor {
    pending: AtomicUsize,
    next_start_bits: AtomicU64,
}

impl PlaybackMonitor {
    /// Whether any remote audio is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        self.pending_sources() > 0
    }

    /// Number of in-flight playback sources.
    pub fn pending_sources(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Clock time the next chunk will start at, in seconds.
    pub fn next_scheduled_time(&self) -> f64 {
        f64::from_bits(self.next_start_bits.load(Ordering::Acquire))
    }

    pub(crate) fn set_pending(&self, count: usize) {
        self.pending.store(count, Ordering::Release);
    }

    fn set_next(&self, next: f64) {
        self.next_start_bits.store(next.to_bits(), Ordering::Release);
    }
}

/// Decode a base64 PCM16 payload into a chunk at `sample_rate`.
pub fn decode_chunk(encoded: &str, sample_rate: u32) -> Result<AudioChunk> {
    AudioChunk::from_base64_pcm16(encoded, sample_rate)
}

/// Schedules decoded chunks back to back on an [`OutputContext`].
///
/// Keeps `next_scheduled_time` and the set of pending sources. When the clock
/// has caught up with `next_scheduled_time` (an underrun, or nothing scheduled
/// yet) the next chunk starts `pad` seconds after `now`, never in the past.
/// Otherwise it starts exactly where the previous chunk ends.
pub struct PlaybackScheduler {
    output: Box<dyn OutputContext>,
    pad: f64,
    next_scheduled_time: f64,
    pending: HashSet<SourceId>,
    next_id: SourceId,
    monitor: Arc<PlaybackMonitor>,
    closed: bool,
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("pad", &self.pad)
            .field("next_scheduled_time", &self.next_scheduled_time)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl PlaybackScheduler {
    /// Create a scheduler over `output`.
    pub fn new(output: Box<dyn OutputContext>, pad: f64, monitor: Arc<PlaybackMonitor>) -> Self {
        monitor.set_pending(0);
        monitor.set_next(0.0);
        Self {
            output,
            pad,
            next_scheduled_time: 0.0,
            pending: HashSet::new(),
            next_id: 1,
            monitor,
            closed: false,
        }
    }

    /// Clock time the next chunk will start at.
    pub fn next_scheduled_time(&self) -> f64 {
        self.next_scheduled_time
    }

    /// Number of sources started and not yet ended or stopped.
    pub fn pending_sources(&self) -> usize {
        self.pending.len()
    }

    /// Whether anything is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Output rate of the underlying context.
    pub fn output_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    /// Current output clock.
    pub fn now(&self) -> f64 {
        self.output.current_time()
    }

    /// Schedule `chunk` given the clock reads `now`.
    ///
    /// Returns the start time, or `None` for an empty chunk.
    pub fn schedule_at(&mut self, chunk: AudioChunk, now: f64) -> Result<Option<f64>> {
        if self.closed {
            return Err(DuplexError::SessionClosed);
        }
        if chunk.is_empty() {
            return Ok(None);
        }

        if self.next_scheduled_time <= now {
            self.next_scheduled_time = now + self.pad;
        }
        let start = self.next_scheduled_time;
        let duration = chunk.duration();
        let id = self.next_id;
        self.next_id += 1;

        self.output.start_source(id, chunk, start)?;
        self.pending.insert(id);
        self.next_scheduled_time = start + duration;
        self.publish();

        tracing::trace!(source = id, start, duration, "scheduled playback chunk");
        Ok(Some(start))
    }

    /// Schedule `chunk` against the output context's own clock.
    pub fn schedule(&mut self, chunk: AudioChunk) -> Result<Option<f64>> {
        let now = self.output.current_time();
        self.schedule_at(chunk, now)
    }

    /// Forget a source that played to the end.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        let removed = self.pending.remove(&id);
        if removed {
            self.publish();
        }
        removed
    }

    /// Stop every pending source and clear the set. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let count = self.pending.len();
        for id in self.pending.drain() {
            self.output.stop_source(id);
        }
        self.publish();
        count
    }

    /// Rewind the schedule to the start of the clock.
    pub fn reset(&mut self) {
        self.next_scheduled_time = 0.0;
        self.publish();
    }

    /// Cut off everything queued, as on barge-in.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.reset();
        stopped
    }

    /// Close the output context. Only the first call reaches the device.
    pub fn close_output(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.output.close()
    }

    fn publish(&self) {
        self.monitor.set_pending(self.pending.len());
        self.monitor.set_next(self.next_scheduled_time);
    }
}
