use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parking_lot::Mutex;

use super::{StreamInfo, StreamThread, build_error};
use crate::audio::AudioFrame;
use crate::devices::{CaptureContext, CaptureSink, MediaTrack, Microphone, TrackKind};
use crate::error::{DuplexError, Result};

type SinkSlot = Arc<Mutex<Option<CaptureSink>>>;

pub(super) fn open(window: usize) -> Result<Microphone> {
    let slot: SinkSlot = Arc::new(Mutex::new(None));
    let stream_slot = slot.clone();
    let (thread, info) =
        StreamThread::spawn("duplex-voice-input", move || build(stream_slot, window))?;

    Ok(Microphone {
        context: Box::new(CpalCapture { sample_rate: info.sample_rate, slot }),
        tracks: vec![Box::new(CpalTrack { thread })],
    })
}

fn build(slot: SinkSlot, window: usize) -> Result<(cpal::Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DuplexError::permission("no input device available"))?;
    let supported = device
        .default_input_config()
        .map_err(|e| DuplexError::device(format!("no usable input config: {}", e)))?;
    let config: StreamConfig = supported.config();
    let info = StreamInfo { sample_rate: config.sample_rate.0, channels: config.channels };
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = info.sample_rate,
        channels = info.channels,
        format = ?supported.sample_format(),
        "opened input device"
    );

    let windower = Windower::new(info, window, slot);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, windower)?,
        SampleFormat::I16 => build_typed::<i16>(&device, &config, windower)?,
        SampleFormat::U16 => build_typed::<u16>(&device, &config, windower)?,
        other => {
            return Err(DuplexError::device(format!("unsupported input sample format {:?}", other)));
        }
    };
    stream.play().map_err(|e| DuplexError::device(format!("failed to start input: {}", e)))?;
    Ok((stream, info))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut windower: Windower,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| windower.push(data),
            |err| tracing::error!(error = %err, "input stream error"),
            None,
        )
        .map_err(build_error)
}

/// Downmixes interleaved input and cuts it into fixed windows.
struct Windower {
    info: StreamInfo,
    window: usize,
    buffer: Vec<f32>,
    slot: SinkSlot,
}

impl Windower {
    fn new(info: StreamInfo, window: usize, slot: SinkSlot) -> Self {
        Self { info, window, buffer: Vec::with_capacity(window), slot }
    }

    fn push<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let channels = usize::from(self.info.channels.max(1));
        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
            self.buffer.push(sum / frame.len() as f32);

            if self.buffer.len() == self.window {
                if let Some(sink) = self.slot.lock().as_mut() {
                    sink(AudioFrame::new(&self.buffer, self.info.sample_rate));
                }
                self.buffer.clear();
            }
        }
    }
}

struct CpalCapture {
    sample_rate: u32,
    slot: SinkSlot,
}

impl CaptureContext for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn attach(&mut self, sink: CaptureSink) -> Result<()> {
        *self.slot.lock() = Some(sink);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}

struct CpalTrack {
    thread: StreamThread,
}

impl MediaTrack for CpalTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&mut self) {
        self.thread.stop();
    }
}
