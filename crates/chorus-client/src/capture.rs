//! Microphone capture — `cpal` input on a dedicated OS thread.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on its own thread and
//! the [`MicSource`] handle talks to it over a command channel. Captured
//! audio is downmixed to mono, resampled from the device rate to the
//! negotiated rate, sliced into fixed ~100 ms frames, encoded PCM16 LE,
//! and posted to the session's frame channel. A full channel drops the
//! frame — capture must never stall the device callback.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::{MicSource, f32_to_pcm16};
use crate::error::ClientError;

/// Frame length as a fraction of a second (100 ms).
const FRAMES_PER_SECOND: u32 = 10;

enum Command {
    Start {
        sample_rate: u32,
        frames: mpsc::Sender<Bytes>,
        reply: std_mpsc::Sender<Result<(), ClientError>>,
    },
    Stop,
    Shutdown,
}

/// Production [`MicSource`] over the default cpal input device.
pub struct CpalMicSource {
    commands: std_mpsc::Sender<Command>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalMicSource {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = std_mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("chorus-mic".to_string())
            .spawn(move || audio_thread(rx))
            .expect("spawning the capture thread");
        Self {
            commands: tx,
            thread: Some(thread),
        }
    }
}

impl Default for CpalMicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MicSource for CpalMicSource {
    fn start(&mut self, sample_rate: u32, frames: mpsc::Sender<Bytes>) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.commands
            .send(Command::Start {
                sample_rate,
                frames,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::AudioSetupFailed("capture thread gone".to_string()))?;
        reply_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| ClientError::AudioSetupFailed("capture thread unresponsive".to_string()))?
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

impl Drop for CpalMicSource {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Thread body: owns the (non-`Send`) stream between Start and Stop.
fn audio_thread(commands: std_mpsc::Receiver<Command>) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = commands.recv() {
        match command {
            Command::Start {
                sample_rate,
                frames,
                reply,
            } => {
                stream = None;
                let result = build_stream(sample_rate, frames);
                match result {
                    Ok(new_stream) => {
                        stream = Some(new_stream);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Stop => stream = None,
            Command::Shutdown => break,
        }
    }
    drop(stream);
}

fn build_stream(
    target_rate: u32,
    frames: mpsc::Sender<Bytes>,
) -> Result<cpal::Stream, ClientError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(ClientError::MicDenied)?;
    let config = device
        .default_input_config()
        .map_err(|_| ClientError::MicDenied)?;

    let device_rate = config.sample_rate().0;
    let channels = config.channels();
    debug!(
        device = %device.name().unwrap_or_default(),
        device_rate,
        channels,
        target_rate,
        "microphone capture starting"
    );

    let stream_config: StreamConfig = config.config();
    let mut pipeline = FramePipeline::new(device_rate, target_rate, channels, frames)?;

    let err_fn = |e| warn!(error = %e, "capture stream error");
    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| pipeline.push(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                pipeline.push(&floats);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(ClientError::AudioSetupFailed(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }
    .map_err(|e| ClientError::AudioSetupFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| ClientError::AudioSetupFailed(e.to_string()))?;
    Ok(stream)
}

/// Downmix → resample → slice → encode → post.
struct FramePipeline {
    channels: u16,
    /// Device-rate mono samples waiting for a full resampler chunk.
    pending_in: Vec<f32>,
    /// Target-rate samples waiting for a full 100 ms frame.
    pending_out: Vec<f32>,
    /// `None` when the device already runs at the target rate.
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    frame_samples: usize,
    frames: mpsc::Sender<Bytes>,
}

impl FramePipeline {
    fn new(
        device_rate: u32,
        target_rate: u32,
        channels: u16,
        frames: mpsc::Sender<Bytes>,
    ) -> Result<Self, ClientError> {
        let chunk_in = (device_rate / FRAMES_PER_SECOND) as usize;
        let resampler = if device_rate == target_rate {
            None
        } else {
            Some(
                FftFixedIn::new(
                    device_rate as usize,
                    target_rate as usize,
                    chunk_in,
                    2,
                    1,
                )
                .map_err(|e| ClientError::AudioSetupFailed(e.to_string()))?,
            )
        };
        Ok(Self {
            channels,
            pending_in: Vec::new(),
            pending_out: Vec::new(),
            resampler,
            chunk_in,
            frame_samples: (target_rate / FRAMES_PER_SECOND) as usize,
            frames,
        })
    }

    fn push(&mut self, interleaved: &[f32]) {
        if self.channels <= 1 {
            self.pending_in.extend_from_slice(interleaved);
        } else {
            let channels = usize::from(self.channels);
            self.pending_in.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );
        }

        while self.pending_in.len() >= self.chunk_in {
            let chunk: Vec<f32> = self.pending_in.drain(..self.chunk_in).collect();
            match &mut self.resampler {
                None => self.pending_out.extend(chunk),
                Some(resampler) => match resampler.process(&[chunk], None) {
                    Ok(mut output) => self.pending_out.extend(output.remove(0)),
                    Err(e) => {
                        warn!(error = %e, "resampling failed, dropping chunk");
                    }
                },
            }
        }

        while self.pending_out.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending_out.drain(..self.frame_samples).collect();
            let pcm = Bytes::from(f32_to_pcm16(&frame));
            if let Err(mpsc::error::TrySendError::Full(_)) = self.frames.try_send(pcm) {
                // Consumer is behind; dropping beats blocking the device
                // callback.
                warn!("microphone frame channel full, dropping frame");
            }
        }
    }
}
