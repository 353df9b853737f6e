//! Audio device seams.
//!
//! The session negotiates sample rates with the server (`ready`) and then
//! starts both pipelines through these traits. Production implementations
//! live in [`crate::capture`] (cpal) and [`crate::playback`] (rodio);
//! tests use recording fakes.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ClientError;

/// Microphone capture posting fixed-size PCM16 LE frames.
pub trait MicSource: Send {
    /// Start capturing at `sample_rate` Hz mono, posting ~100 ms frames to
    /// `frames`. Fails with [`ClientError::MicDenied`] when no device is
    /// available and [`ClientError::AudioSetupFailed`] otherwise.
    fn start(
        &mut self,
        sample_rate: u32,
        frames: mpsc::Sender<Bytes>,
    ) -> Result<(), ClientError>;

    /// Stop capturing and release the device. Idempotent.
    fn stop(&mut self);
}

/// Streaming PCM16 LE playback with instant clear.
pub trait SpeakerSink: Send {
    /// Open the output device for `sample_rate` Hz mono playback.
    fn start(&mut self, sample_rate: u32) -> Result<(), ClientError>;

    /// Queue one PCM16 LE chunk for playback.
    fn enqueue(&self, pcm: &Bytes);

    /// Drop everything queued, immediately. Playback of later chunks
    /// continues from silence.
    fn clear(&self);

    /// Stop playback and release the device. Idempotent.
    fn stop(&mut self);
}

/// Decode PCM16 LE bytes to f32 samples in −1.0..=1.0.
///
/// A trailing odd byte (a torn frame) is ignored.
#[must_use]
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
        .collect()
}

/// Normalized level (0.0–1.0) of one PCM16 LE frame, for UI meters.
///
/// RMS mapped so that ~0.3 RMS (very loud speech) saturates the meter.
#[must_use]
pub fn audio_level(pcm: &[u8]) -> f32 {
    let samples = pcm16_to_f32(pcm);
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let rms = (sum_sq / samples.len() as f32).sqrt();
    (rms / 0.3).min(1.0)
}

/// Encode f32 samples (clamped to −1.0..=1.0) to PCM16 LE bytes.
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        #[allow(clippy::cast_possible_truncation)]
        let value = (clamped * 32_767.0) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_round_trip_is_close() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let decoded = pcm16_to_f32(&f32_to_pcm16(&samples));
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 0.001, "{a} vs {b}");
        }
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        assert_eq!(pcm16_to_f32(&[0, 0, 7]).len(), 1);
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let pcm = f32_to_pcm16(&[4.0, -4.0]);
        let decoded = pcm16_to_f32(&pcm);
        assert!((decoded[0] - 1.0).abs() < 0.001);
        assert!((decoded[1] + 1.0).abs() < 0.001);
    }

    #[test]
    fn audio_level_scales_with_amplitude() {
        assert!(audio_level(&[]) < f32::EPSILON);
        let quiet = f32_to_pcm16(&[0.03f32; 160]);
        let loud = f32_to_pcm16(&[0.5f32; 160]);
        assert!(audio_level(&quiet) < 0.5);
        assert!((audio_level(&loud) - 1.0).abs() < f32::EPSILON);
    }
}
