//! Configuration management for parley

pub mod file;

use std::path::PathBuf;

/// Default gateway port (matches the client default URL)
const DEFAULT_PORT: u16 = 3000;

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// LLM model identifier for chat completions
    pub llm_model: String,

    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Client configuration
    pub client: ClientConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Directory for transient audio staging files
    pub staging_dir: PathBuf,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat completions, TTS)
    pub openai: Option<String>,
}

/// Client-side configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway base URL
    pub gateway_url: String,

    /// Path to the persisted conversation history file
    pub history_path: PathBuf,
}

/// Default history file: `~/.local/share/parley/history.json`
fn default_history_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("history.json"),
        |d| d.data_dir().join("parley").join("history.json"),
    )
}

impl Config {
    /// Load configuration (env > config file > defaults)
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
        };

        let server = ServerConfig {
            port: std::env::var("PARLEY_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            staging_dir: std::env::var("PARLEY_STAGING_DIR")
                .ok()
                .map(PathBuf::from)
                .or(fc.server.staging_dir)
                .unwrap_or_else(std::env::temp_dir),
        };

        let voice = VoiceConfig {
            stt_model: std::env::var("PARLEY_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: std::env::var("PARLEY_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: std::env::var("PARLEY_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: std::env::var("PARLEY_TTS_SPEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.voice.tts_speed)
                .unwrap_or(1.0),
        };

        let llm_model = std::env::var("PARLEY_LLM_MODEL")
            .ok()
            .or(fc.llm.model)
            .unwrap_or_else(|| "gpt-4o".to_string());

        let client = ClientConfig {
            gateway_url: std::env::var("PARLEY_GATEWAY_URL")
                .ok()
                .or(fc.client.gateway_url)
                .unwrap_or_else(|| format!("http://localhost:{}", server.port)),
            history_path: std::env::var("PARLEY_HISTORY_PATH")
                .ok()
                .map(PathBuf::from)
                .or(fc.client.history_path)
                .unwrap_or_else(default_history_path),
        };

        Self {
            voice,
            api_keys,
            llm_model,
            server,
            client,
        }
    }

    /// The `OpenAI` API key, or a configuration error naming the fix
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] when no key is configured
    pub fn require_openai_key(&self) -> crate::Result<&str> {
        self.api_keys.openai.as_deref().ok_or_else(|| {
            crate::Error::Config(
                "OPENAI_API_KEY is not set (env or [api_keys] in config.toml)".to_string(),
            )
        })
    }
}
