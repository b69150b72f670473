//! Voice processing module
//!
//! Capture and playback run client-side; STT runs gateway-side behind
//! the [`Transcriber`] trait.

mod capture;
mod playback;
mod stt;
mod tts;

pub use capture::{AudioClip, CaptureController, CaptureState, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, CancelToken, Speaker};
pub use stt::{SpeechToText, Transcriber, extension_for_mime};
pub use tts::TextToSpeech;
