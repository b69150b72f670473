//! The conversation turn endpoint
//!
//! `POST /api/chat` receives one audio clip plus the client's history
//! snapshot, runs transcription then generation, and returns the new
//! turn's text pair. The server appends nothing anywhere: history
//! ownership stays entirely client-side.

use std::io::Write;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;

use super::ApiState;
use crate::history::Message;

/// Build the chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/chat", post(chat_turn)).with_state(state)
}

/// A completed turn: the transcribed user text and the reply
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub user: String,
    pub bot: String,
}

/// Wire error body (same shape for 4xx and 5xx)
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Internal failure kinds, preserved for logging only
///
/// Everything except `MissingAudio` collapses to one generic 500 on
/// the wire; the kind tag restores diagnosability in the logs without
/// changing the external contract.
#[derive(Debug)]
pub enum TurnError {
    MissingAudio,
    Upload(String),
    History(String),
    Staging(String),
    Transcription(String),
    Generation(String),
}

impl TurnError {
    fn kind(&self) -> &'static str {
        match self {
            Self::MissingAudio => "missing_audio",
            Self::Upload(_) => "upload",
            Self::History(_) => "history",
            Self::Staging(_) => "staging",
            Self::Transcription(_) => "transcription",
            Self::Generation(_) => "generation",
        }
    }
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingAudio => {
                tracing::warn!("turn request rejected: no audio field");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: "No audio file uploaded.".to_string(),
                    }),
                )
                    .into_response()
            }
            Self::Upload(ref detail)
            | Self::History(ref detail)
            | Self::Staging(ref detail)
            | Self::Transcription(ref detail)
            | Self::Generation(ref detail) => {
                tracing::error!(kind = self.kind(), error = %detail, "turn failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "An error occurred during the chat process.".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Handle one conversation turn
async fn chat_turn(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<TurnResponse>, TurnError> {
    let mut audio: Option<(Vec<u8>, String)> = None;
    let mut history_json: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TurnError::Upload(e.to_string()))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("audio") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("audio/webm")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| TurnError::Upload(e.to_string()))?;
                audio = Some((bytes.to_vec(), content_type));
            }
            Some("history") => {
                history_json = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| TurnError::Upload(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let Some((clip, content_type)) = audio.filter(|(bytes, _)| !bytes.is_empty()) else {
        return Err(TurnError::MissingAudio);
    };
    tracing::debug!(audio_bytes = clip.len(), %content_type, "turn request received");

    let history: Vec<Message> = match history_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| TurnError::History(format!("malformed history field: {e}")))?,
        None => Vec::new(),
    };

    let user_text = transcribe_staged(&state, &clip, &content_type).await?;

    let bot_text = state
        .generator
        .generate(&history, &user_text)
        .await
        .map_err(|e| TurnError::Generation(e.to_string()))?;

    Ok(Json(TurnResponse {
        user: user_text,
        bot: bot_text,
    }))
}

/// Stage the clip to a transient file and transcribe it
///
/// The staging file has a per-request unique name, so concurrent
/// requests never share a path, and it is removed on every exit path
/// (the guard deletes it on drop).
async fn transcribe_staged(
    state: &ApiState,
    clip: &[u8],
    content_type: &str,
) -> Result<String, TurnError> {
    let mut staged = tempfile::Builder::new()
        .prefix("turn-audio-")
        .suffix(&format!(".{}", crate::voice::extension_for_mime(content_type)))
        .tempfile_in(&state.staging_dir)
        .map_err(|e| TurnError::Staging(e.to_string()))?;

    staged
        .write_all(clip)
        .and_then(|()| staged.flush())
        .map_err(|e| TurnError::Staging(e.to_string()))?;

    let staged_bytes = std::fs::read(staged.path()).map_err(|e| TurnError::Staging(e.to_string()))?;

    state
        .transcriber
        .transcribe(&staged_bytes, content_type)
        .await
        .map_err(|e| TurnError::Transcription(e.to_string()))
}
