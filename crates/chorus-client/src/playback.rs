//! Speaker playback — `rodio` output on a dedicated OS thread.
//!
//! Mirrors the capture side: `rodio::OutputStream` is not `Send`, so the
//! device lives on its own thread behind a command channel. TTS chunks are
//! appended to a streaming sink as they arrive; `clear()` empties the sink
//! immediately — the barge-in path — while later chunks keep playing.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use bytes::Bytes;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{debug, warn};

use crate::audio::SpeakerSink;
use crate::error::ClientError;

enum Command {
    Start {
        sample_rate: u32,
        reply: std_mpsc::Sender<Result<(), ClientError>>,
    },
    Enqueue(Bytes),
    Clear,
    Stop,
    Shutdown,
}

/// Production [`SpeakerSink`] over the default rodio output device.
pub struct RodioSpeakerSink {
    commands: std_mpsc::Sender<Command>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RodioSpeakerSink {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = std_mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("chorus-speaker".to_string())
            .spawn(move || audio_thread(rx))
            .expect("spawning the playback thread");
        Self {
            commands: tx,
            thread: Some(thread),
        }
    }
}

impl Default for RodioSpeakerSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerSink for RodioSpeakerSink {
    fn start(&mut self, sample_rate: u32) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.commands
            .send(Command::Start {
                sample_rate,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::AudioSetupFailed("playback thread gone".to_string()))?;
        reply_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| ClientError::AudioSetupFailed("playback thread unresponsive".to_string()))?
    }

    fn enqueue(&self, pcm: &Bytes) {
        let _ = self.commands.send(Command::Enqueue(pcm.clone()));
    }

    fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

impl Drop for RodioSpeakerSink {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Thread body: owns the (non-`Send`) output stream and sink.
fn audio_thread(commands: std_mpsc::Receiver<Command>) {
    // Kept alive alongside the sink; dropping it kills playback.
    let mut output: Option<(OutputStream, Sink)> = None;
    let mut sample_rate = 0u32;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start { sample_rate: rate, reply } => {
                let result = OutputStream::try_default()
                    .map_err(|e| ClientError::AudioSetupFailed(e.to_string()))
                    .and_then(|(stream, handle)| {
                        Sink::try_new(&handle)
                            .map(|sink| (stream, sink))
                            .map_err(|e| ClientError::AudioSetupFailed(e.to_string()))
                    });
                match result {
                    Ok(pair) => {
                        debug!(sample_rate = rate, "speaker playback started");
                        sample_rate = rate;
                        output = Some(pair);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Enqueue(pcm) => {
                let Some((_, sink)) = &output else {
                    warn!("TTS chunk before playback start, dropping");
                    continue;
                };
                if pcm.len() < 2 {
                    continue;
                }
                let samples: Vec<i16> = pcm
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                sink.append(SamplesBuffer::new(1, sample_rate, samples));
                // clear() pauses the sink; make sure fresh audio plays.
                sink.play();
            }
            Command::Clear => {
                if let Some((_, sink)) = &output {
                    sink.clear();
                }
            }
            Command::Stop => output = None,
            Command::Shutdown => break,
        }
    }
    drop(output);
}
