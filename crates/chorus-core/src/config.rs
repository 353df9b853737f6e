//! Platform configuration from the environment.
//!
//! Required variables fail startup with the variable named in the error;
//! everything else has a default. `.env` loading (dotenvy) happens in the
//! CLI before this module reads the environment.

use std::path::PathBuf;

/// Environment variables that every deployed bundle must provide.
///
/// The deploy endpoint rejects bundles whose `env` is missing any of these.
pub const REQUIRED_PLATFORM_SECRETS: &[&str] = &["ASSEMBLYAI_API_KEY", "ASSEMBLYAI_TTS_API_KEY"];

/// Default LLM model when `LLM_MODEL` is unset.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Microphone sample rate advertised in `ready` (Hz).
pub const MIC_SAMPLE_RATE: u32 = 16_000;

/// TTS output sample rate advertised in `ready` (Hz).
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// Process-wide configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// STT vendor key (required).
    pub assemblyai_api_key: String,
    /// TTS vendor key (required).
    pub assemblyai_tts_api_key: String,
    /// Override for the TTS vendor WebSocket URL.
    pub tts_wss_url: Option<String>,
    /// Chat model identifier.
    pub llm_model: String,
    /// Key for the LLM endpoint, when it requires one.
    pub llm_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible chat endpoint.
    pub llm_base_url: String,
    /// HTTP listen port.
    pub port: u16,
    /// Root directory for deployed bundles.
    pub bundle_dir: PathBuf,
    /// SQLite database path for the deploy slot index.
    pub db_path: PathBuf,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

impl PlatformConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let assemblyai_api_key = require("ASSEMBLYAI_API_KEY")?;
        let assemblyai_tts_api_key = require("ASSEMBLYAI_TTS_API_KEY")?;

        let port = match std::env::var("CHORUS_PORT") {
            Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar {
                var: "CHORUS_PORT",
                value: v,
            })?,
            Err(_) => 8017,
        };

        Ok(Self {
            assemblyai_api_key,
            assemblyai_tts_api_key,
            tts_wss_url: std::env::var("ASSEMBLYAI_TTS_WSS_URL").ok(),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            port,
            bundle_dir: std::env::var("CHORUS_BUNDLE_DIR")
                .map_or_else(|_| PathBuf::from("bundles"), PathBuf::from),
            db_path: std::env::var("CHORUS_DB_PATH")
                .map_or_else(|_| PathBuf::from("chorus.db"), PathBuf::from),
        })
    }

    /// The secrets snapshot handed to sandboxes in single-agent mode.
    #[must_use]
    pub fn platform_secrets(&self) -> std::collections::HashMap<String, String> {
        let mut secrets = std::collections::HashMap::new();
        secrets.insert(
            "ASSEMBLYAI_API_KEY".to_string(),
            self.assemblyai_api_key.clone(),
        );
        secrets.insert(
            "ASSEMBLYAI_TTS_API_KEY".to_string(),
            self.assemblyai_tts_api_key.clone(),
        );
        secrets
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(var)),
    }
}
