use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parking_lot::Mutex;

use super::{StreamInfo, StreamThread, build_error};
use crate::audio::AudioChunk;
use crate::capture::downsample;
use crate::devices::{EndedSender, OutputContext, SourceId};
use crate::error::{DuplexError, Result};

pub(super) fn open(sample_rate: u32, ended: EndedSender) -> Result<Box<dyn OutputContext>> {
    let mixer = Arc::new(Mutex::new(None::<Mixer>));
    let stream_mixer = mixer.clone();
    let (thread, info) =
        StreamThread::spawn("duplex-voice-output", move || build(stream_mixer, ended))?;

    Ok(Box::new(CpalOutput { sample_rate, info, mixer, thread }))
}

fn build(slot: Arc<Mutex<Option<Mixer>>>, ended: EndedSender) -> Result<(cpal::Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device =
        host.default_output_device().ok_or_else(|| DuplexError::device("no output device available"))?;
    let supported = device
        .default_output_config()
        .map_err(|e| DuplexError::device(format!("no usable output config: {}", e)))?;
    let config: StreamConfig = supported.config();
    let info = StreamInfo { sample_rate: config.sample_rate.0, channels: config.channels };
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = info.sample_rate,
        channels = info.channels,
        format = ?supported.sample_format(),
        "opened output device"
    );

    *slot.lock() = Some(Mixer::new(info.sample_rate, ended));
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, slot)?,
        SampleFormat::I16 => build_typed::<i16>(&device, &config, slot)?,
        SampleFormat::U16 => build_typed::<u16>(&device, &config, slot)?,
        other => {
            return Err(DuplexError::device(format!("unsupported output sample format {:?}", other)));
        }
    };
    stream.play().map_err(|e| DuplexError::device(format!("failed to start output: {}", e)))?;
    Ok((stream, info))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    slot: Arc<Mutex<Option<Mixer>>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                match slot.lock().as_mut() {
                    Some(mixer) => mixer.render(&mut mono),
                    None => mono.fill(0.0),
                }
                for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(*value));
                }
            },
            |err| tracing::error!(error = %err, "output stream error"),
            None,
        )
        .map_err(build_error)
}

struct Voice {
    id: SourceId,
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sums scheduled sources onto a running sample clock.
///
/// The clock is the number of frames rendered so far divided by the device
/// rate. Sources start on the exact frame their start time maps to.
pub struct Mixer {
    rate: u32,
    rendered: u64,
    voices: Vec<Voice>,
    ended: EndedSender,
}

impl Mixer {
    pub fn new(rate: u32, ended: EndedSender) -> Self {
        Self { rate, rendered: 0, voices: Vec::new(), ended }
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.rendered as f64 / self.rate as f64
    }

    /// Queue `samples` (already at the device rate) to start at `at` seconds.
    pub fn add(&mut self, id: SourceId, samples: Vec<f32>, at: f64) {
        let start = (at.max(0.0) * self.rate as f64).round() as u64;
        self.voices.push(Voice { id, start, samples });
    }

    /// Drop a source without reporting it as ended.
    pub fn remove(&mut self, id: SourceId) {
        self.voices.retain(|v| v.id != id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Fill `out` with the next frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let first = self.rendered;
        let last = first + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start.max(first);
            let to = voice.end().min(last);
            for t in from..to {
                out[(t - first) as usize] += voice.samples[(t - voice.start) as usize];
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.rendered = last;
        let ended = &self.ended;
        self.voices.retain(|v| {
            let done = v.end() <= last;
            if done {
                let _ = ended.send(v.id);
            }
            !done
        });
    }
}

struct CpalOutput {
    sample_rate: u32,
    info: StreamInfo,
    mixer: Arc<Mutex<Option<Mixer>>>,
    thread: StreamThread,
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().as_ref().map(Mixer::current_time).unwrap_or(0.0)
    }

    fn start_source(&mut self, id: SourceId, chunk: AudioChunk, at: f64) -> Result<()> {
        let samples = if chunk.sample_rate == self.info.sample_rate {
            chunk.samples
        } else {
            downsample(&chunk.samples, chunk.sample_rate, self.info.sample_rate)
        };
        match self.mixer.lock().as_mut() {
            Some(mixer) => {
                mixer.add(id, samples, at);
                Ok(())
            }
            None => Err(DuplexError::SessionClosed),
        }
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Some(mixer) = self.mixer.lock().as_mut() {
            mixer.remove(id);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut mixer) = self.mixer.lock().take() {
            mixer.clear();
        }
        self.thread.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_mixer_places_sources_on_the_clock() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx);
        mixer.add(1, vec![0.5; 3], 0.2);

        let mut out = [0.0f32; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
        assert!(rx.try_recv().is_err());

        mixer.render(&mut out);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!((mixer.current_time() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_mixer_sums_and_clamps() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx);
        mixer.add(1, vec![0.75; 2], 0.0);
        mixer.add(2, vec![0.75; 2], 0.0);
        let mut out = [0.0f32; 2];
        mixer.render(&mut out);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_removed_source_is_silent_and_not_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx);
        mixer.add(7, vec![0.5; 2], 0.0);
        mixer.remove(7);
        let mut out = [0.0f32; 2];
        mixer.render(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert!(rx.try_recv().is_err());
    }
}
