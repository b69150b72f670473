//! HTTP API server for the transcription & response gateway
//!
//! Each request is independent: the only shared pieces of state are
//! the external-service clients and the staging directory. No session
//! affinity, no server-side history.

pub mod chat;
pub mod health;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::llm::Generator;
use crate::voice::Transcriber;
use crate::{Config, Result};

/// Whisper's upload ceiling
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for API handlers
pub struct ApiState {
    /// Speech-to-text backend
    pub transcriber: Arc<dyn Transcriber>,

    /// Text-generation backend
    pub generator: Arc<dyn Generator>,

    /// Directory for per-request staging files
    pub staging_dir: PathBuf,
}

impl ApiState {
    /// Build state with live `OpenAI` backends from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_openai_key()?.to_string();

        Ok(Self {
            transcriber: Arc::new(crate::voice::SpeechToText::new(
                api_key.clone(),
                config.voice.stt_model.clone(),
            )?),
            generator: Arc::new(crate::llm::ChatModel::new(api_key, config.llm_model.clone())?),
            staging_dir: config.server.staging_dir.clone(),
        })
    }
}

/// Build the router with all routes and layers
#[must_use]
pub fn app(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", chat::router(state))
        .merge(health::router())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server from shared state and a port
    #[must_use]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "gateway listening");

        axum::serve(listener, app(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
