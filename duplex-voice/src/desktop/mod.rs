//! Desktop audio backend built on `cpal`.
//!
//! `cpal` streams are not `Send`, so each stream lives on its own thread for
//! as long as the session holds it. The session talks to those threads through
//! shared state only: a sink slot for capture, a mixer for playback.
//!
//! Cameras are not supported here; sessions with a video interval fail to
//! start with a device error.

mod input;
mod output;

use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;

use crate::devices::{EndedSender, MediaDevices, Microphone, OutputContext};
use crate::error::{DuplexError, Result};

pub use output::Mixer;

/// Samples per capture window delivered to the session.
pub const DEFAULT_WINDOW: usize = 4096;

/// Default host input and output devices.
#[derive(Debug, Clone)]
pub struct CpalDevices {
    window: usize,
}

impl Default for CpalDevices {
    fn default() -> Self {
        Self { window: DEFAULT_WINDOW }
    }
}

impl CpalDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver capture windows of `window` mono samples.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }
}

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn open_microphone(&self) -> Result<Microphone> {
        let window = self.window;
        tokio::task::spawn_blocking(move || input::open(window))
            .await
            .map_err(|e| DuplexError::device(format!("input thread failed: {}", e)))?
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        ended: EndedSender,
    ) -> Result<Box<dyn OutputContext>> {
        tokio::task::spawn_blocking(move || output::open(sample_rate, ended))
            .await
            .map_err(|e| DuplexError::device(format!("output thread failed: {}", e)))?
    }
}

/// Format of an opened stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A thread keeping one `cpal::Stream` alive.
///
/// The thread owns whatever `build` returned and drops it when stopped.
pub(crate) struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and keep its stream playing until stopped.
    pub fn spawn<F, S>(name: &str, build: F) -> Result<(Self, StreamInfo)>
    where
        F: FnOnce() -> Result<(S, StreamInfo)> + Send + 'static,
        S: 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until stop() or the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DuplexError::device(format!("failed to spawn {}: {}", name, e)))?;

        let info = ready_rx
            .recv()
            .map_err(|_| DuplexError::device(format!("{} exited before opening", name)))??;
        Ok((Self { stop: Some(stop_tx), handle: Some(handle) }, info))
    }

    /// Signal the thread to drop its stream. Later calls do nothing.
    ///
    /// Inside a tokio runtime the join happens on the blocking pool, so the
    /// calling worker is never parked on device shutdown.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || join(handle));
            }
            Err(_) => join(handle),
        }
    }
}

fn join(handle: thread::JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::warn!("audio stream thread panicked");
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map cpal's build errors onto the session's error kinds.
pub(crate) fn build_error(e: cpal::BuildStreamError) -> DuplexError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DuplexError::permission("audio device not available or access denied")
        }
        other => DuplexError::device(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    struct SlowRelease(Arc<AtomicBool>);

    impl Drop for SlowRelease {
        fn drop(&mut self) {
            thread::sleep(Duration::from_millis(300));
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn slow_stream(released: Arc<AtomicBool>) -> StreamThread {
        let info = StreamInfo { sample_rate: 16000, channels: 1 };
        let (thread, opened) =
            StreamThread::spawn("test-stream", move || Ok((SlowRelease(released), info))).unwrap();
        assert_eq!(opened.sample_rate, 16000);
        thread
    }

    #[tokio::test]
    async fn test_stop_inside_runtime_does_not_block() {
        let released = Arc::new(AtomicBool::new(false));
        let mut thread = slow_stream(released.clone());

        let begun = Instant::now();
        thread.stop();
        thread.stop();
        assert!(begun.elapsed() < Duration::from_millis(200));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !released.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "stream was never released");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_stop_outside_runtime_joins() {
        let released = Arc::new(AtomicBool::new(false));
        let mut thread = slow_stream(released.clone());
        thread.stop();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_build_is_reported() {
        let result = StreamThread::spawn("test-stream", || {
            Err::<((), StreamInfo), _>(DuplexError::device("no device"))
        });
        assert!(matches!(result, Err(DuplexError::DeviceError(_))));
    }
}
