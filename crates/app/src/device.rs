//! cpal-backed microphone capture and melody playback.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use candlewish_core::{
    AudioCapture, AudioSink, AudioSource, CandleError, NoteEvent, Result, SampleBuffer, VoiceBank,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, select, Receiver, Sender};

/// Frames buffered between the capture callback and the listener thread.
/// The callback drops frames rather than block when this fills up.
const FRAME_QUEUE: usize = 8;

/// Default system microphone.
#[derive(Debug, Clone, Copy)]
pub struct MicrophoneSource {
    frame_size: usize,
}

impl MicrophoneSource {
    pub fn new(frame_size: usize) -> Self {
        Self { frame_size }
    }
}

/// Open microphone stream. Dropping it stops capture and frees the device.
pub struct MicrophoneCapture {
    _stream: cpal::Stream,
    frames: Receiver<SampleBuffer>,
    errors: Receiver<String>,
}

impl AudioSource for MicrophoneSource {
    type Capture = MicrophoneCapture;

    fn open(&mut self) -> Result<Self::Capture> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CandleError::AudioAccess("no input device found".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device
            .default_input_config()
            .map_err(|err| CandleError::AudioAccess(err.to_string()))?;
        tracing::info!(device = %device_name, ?config, "opening microphone");

        let channels = config.channels() as usize;
        let stream_config: cpal::StreamConfig = config.config();
        let (frame_tx, frames) = bounded(FRAME_QUEUE);
        let (error_tx, errors) = bounded(1);
        let capture = CaptureSpec {
            channels,
            frame_size: self.frame_size,
            frames: frame_tx,
            errors: error_tx,
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::U8 => capture.build::<u8, _>(&device, &stream_config, SampleBuffer::U8),
            cpal::SampleFormat::I16 => {
                capture.build::<i16, _>(&device, &stream_config, SampleBuffer::I16)
            }
            cpal::SampleFormat::F32 => {
                capture.build::<f32, _>(&device, &stream_config, SampleBuffer::F32)
            }
            format => {
                return Err(CandleError::AudioAccess(format!(
                    "unsupported input sample format {format:?}"
                )))
            }
        }
        .map_err(|err| CandleError::AudioAccess(err.to_string()))?;

        stream
            .play()
            .map_err(|err| CandleError::AudioAccess(err.to_string()))?;

        Ok(MicrophoneCapture {
            _stream: stream,
            frames,
            errors,
        })
    }
}

impl AudioCapture for MicrophoneCapture {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<SampleBuffer>> {
        select! {
            recv(self.frames) -> frame => frame
                .map(Some)
                .map_err(|_| CandleError::AudioAccess("capture stream closed".into())),
            recv(self.errors) -> err => Err(CandleError::AudioAccess(
                err.unwrap_or_else(|_| "capture stream closed".into()),
            )),
            default(timeout) => Ok(None),
        }
    }
}

struct CaptureSpec {
    channels: usize,
    frame_size: usize,
    frames: Sender<SampleBuffer>,
    errors: Sender<String>,
}

impl CaptureSpec {
    /// Builds an input stream that takes the first channel of each frame and
    /// hands fixed-size blocks to the listener.
    fn build<T, F>(
        self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        wrap: F,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample + Send + 'static,
        F: Fn(Vec<T>) -> SampleBuffer + Send + 'static,
    {
        let Self {
            channels,
            frame_size,
            frames,
            errors,
        } = self;
        let channels = channels.max(1);
        let mut pending: Vec<T> = Vec::with_capacity(frame_size);

        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    pending.push(frame[0]);
                    if pending.len() == frame_size {
                        let full = std::mem::replace(&mut pending, Vec::with_capacity(frame_size));
                        let _ = frames.try_send(wrap(full));
                    }
                }
            },
            move |err| {
                tracing::error!(%err, "capture stream error");
                let _ = errors.try_send(err.to_string());
            },
            None,
        )
    }
}

/// Default system output, opened on the first note and released on
/// [`AudioSink::stop_all`].
#[derive(Default)]
pub struct SpeakerSink {
    output: Option<Output>,
}

struct Output {
    _stream: cpal::Stream,
    bank: Arc<Mutex<VoiceBank>>,
}

impl SpeakerSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for SpeakerSink {
    fn schedule_note(&mut self, note: &NoteEvent) -> Result<()> {
        if self.output.is_none() {
            self.output = Some(open_output()?);
        }
        let Some(output) = self.output.as_ref() else {
            return Err(CandleError::Sink("output stream missing".into()));
        };

        output
            .bank
            .lock()
            .map_err(|_| CandleError::Sink("voice bank has been poisoned".into()))?
            .add(*note);
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Some(output) = self.output.take() {
            if let Ok(mut bank) = output.bank.lock() {
                bank.clear();
            }
            tracing::debug!("output stream released");
        }
    }
}

fn open_output() -> Result<Output> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CandleError::Sink("no audio output device found".into()))?;
    let config = device
        .default_output_config()
        .map_err(|err| CandleError::Sink(err.to_string()))?;

    let channels = config.channels() as usize;
    let bank = Arc::new(Mutex::new(VoiceBank::new(config.sample_rate().0)));
    let stream_config: cpal::StreamConfig = config.config();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_output::<f32>(&device, &stream_config, Arc::clone(&bank), channels)
        }
        cpal::SampleFormat::I16 => {
            build_output::<i16>(&device, &stream_config, Arc::clone(&bank), channels)
        }
        cpal::SampleFormat::U16 => {
            build_output::<u16>(&device, &stream_config, Arc::clone(&bank), channels)
        }
        format => {
            return Err(CandleError::Sink(format!(
                "unsupported output sample format {format:?}"
            )))
        }
    }
    .map_err(|err| CandleError::Sink(err.to_string()))?;

    stream
        .play()
        .map_err(|err| CandleError::Sink(err.to_string()))?;

    tracing::debug!(
        sample_rate = config.sample_rate().0,
        channels,
        "output stream opened"
    );
    Ok(Output {
        _stream: stream,
        bank,
    })
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bank: Arc<Mutex<VoiceBank>>,
    channels: usize,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let mut mix: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mix.resize(data.len(), 0.0);
            match bank.lock() {
                Ok(mut bank) => bank.render(&mut mix, channels),
                Err(_) => mix.fill(0.0),
            }
            for (out, sample) in data.iter_mut().zip(&mix) {
                *out = T::from_sample(*sample);
            }
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )
}
