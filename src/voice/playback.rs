//! Synthesized speech playback with pre-emption
//!
//! At most one utterance plays at a time: a new `speak` cancels the
//! previous one, and `cancel` (used by conversation reset) silences
//! playback entirely.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::tts::TextToSpeech;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Cancellation flag shared with an in-flight playback
pub type CancelToken = Arc<AtomicBool>;

/// Plays decoded audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play MP3 bytes, stopping early if the token is cancelled
    ///
    /// Blocks the calling thread until playback finishes or is
    /// cancelled; callers run it on a blocking task.
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3(&self, mp3_data: &[u8], cancel: &CancelToken) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play_samples(samples, cancel)
    }

    fn play_samples(&self, samples: Vec<f32>, cancel: &CancelToken) -> Result<()> {
        if samples.is_empty() || cancel.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = config.channels as usize;
        let sample_count = samples.len();

        let cursor = Arc::new(Mutex::new((samples, 0usize)));
        let finished = Arc::new(AtomicBool::new(false));

        let cursor_cb = Arc::clone(&cursor);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut guard) = cursor_cb.lock() else {
                        return;
                    };
                    let (samples, pos) = &mut *guard;

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            let s = samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            finished_cb.store(true, Ordering::Relaxed);
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        // Poll for completion, bounded by clip duration plus slack
        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Relaxed) {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("playback cancelled");
                break;
            }
            if std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(samples = sample_count, "playback finished");

        Ok(())
    }
}

/// Speaks assistant replies, newest request pre-empting the previous
pub struct Speaker {
    tts: TextToSpeech,
    playback: AudioPlayback,
    current: Mutex<Option<CancelToken>>,
}

impl Speaker {
    /// Create a speaker from a TTS client and an output device
    #[must_use]
    pub fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self {
            tts,
            playback,
            current: Mutex::new(None),
        }
    }

    /// Synthesize and play `text`, cancelling any current utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] on synthesis or playback failure;
    /// the speaker remains usable afterwards.
    pub async fn speak(self: &Arc<Self>, text: &str) -> Result<()> {
        let token = self.preempt();

        let audio = self.tts.synthesize(text).await?;
        if token.load(Ordering::Relaxed) {
            // A newer utterance arrived during synthesis
            return Ok(());
        }

        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.playback.play_mp3(&audio, &token))
            .await
            .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }

    /// Cancel the current utterance, if any
    pub fn cancel(&self) {
        let current = self.current.lock().ok().and_then(|mut guard| guard.take());
        if let Some(token) = current {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel the previous utterance and install a fresh token
    fn preempt(&self) -> CancelToken {
        let token: CancelToken = Arc::new(AtomicBool::new(false));
        let previous = self
            .current
            .lock()
            .ok()
            .and_then(|mut guard| guard.replace(Arc::clone(&token)));
        if let Some(previous) = previous {
            previous.store(true, Ordering::Relaxed);
        }
        token
    }
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage_frames() {
        // Not a valid MP3 stream; decoder reaches EOF with no frames
        let samples = decode_mp3(&[0u8; 16]).unwrap();
        assert!(samples.is_empty());
    }
}
