//! Microphone capture and per-turn clip assembly

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// One finished recording, ready for upload
///
/// Owned transiently: handed to the orchestrator for a single
/// submission and discarded when the call resolves.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Capture controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Ready to start a recording
    Idle,
    /// Microphone open, buffering chunks
    Recording,
    /// Clip handed off, awaiting turn resolution
    Processing,
}

/// Owns the microphone lifecycle and the per-turn sample buffer
///
/// The device is opened on `start_capture` (not construction) so a
/// missing microphone surfaces as a per-attempt failure that leaves
/// the controller usable.
pub struct CaptureController {
    state: CaptureState,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureController {
    /// Create a controller in the `Idle` state
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Open the microphone and begin buffering audio chunks
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no input device is available or no
    /// suitable stream config exists; the controller stays `Idle`.
    pub fn start_capture(&mut self) -> Result<()> {
        if self.state != CaptureState::Idle {
            return Err(Error::Device(format!(
                "cannot start capture from {:?}",
                self.state
            )));
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Device("no suitable capture config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "opening microphone"
        );

        let buffer = Arc::clone(&self.buffer);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(stream);
        self.state = CaptureState::Recording;

        tracing::debug!("recording started");
        Ok(())
    }

    /// Stop recording and finalize the buffered chunks into one clip
    ///
    /// The buffer is cleared immediately so a new recording can begin
    /// independently of in-flight processing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] when not currently recording
    pub fn stop_capture(&mut self) -> Result<AudioClip> {
        if self.state != CaptureState::Recording {
            return Err(Error::Device(format!(
                "cannot stop capture from {:?}",
                self.state
            )));
        }

        drop(self.stream.take());

        let samples = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        self.state = CaptureState::Processing;
        tracing::debug!(samples = samples.len(), "recording stopped");

        Ok(AudioClip {
            bytes: samples_to_wav(&samples, SAMPLE_RATE)?,
            content_type: "audio/wav".to_string(),
        })
    }

    /// Return to `Idle` once the turn has resolved (success or failure)
    pub fn finish(&mut self) {
        self.state = CaptureState::Idle;
    }

    /// Samples buffered so far, without consuming them
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }
}

/// Convert f32 samples to WAV bytes for STT upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
