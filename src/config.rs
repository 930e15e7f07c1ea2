//! # Configuration Management
//!
//! This module handles loading and managing service configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with STT_ prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms set these)
//! 2. Environment variables such as `STT_TRANSCODER__TIMEOUT_SECS=30`
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: derive macros turn these structs into/from TOML, env vars and JSON
//! - **#[serde(rename_all)]**: lets an enum be written as `"whisper"` in config files
//! - **anyhow::Result**: startup errors carry a readable message and abort `main`

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main service configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each pipeline stage (ingress, transcoder, recognizer) reads only its own
/// section, so a stage can be constructed and tested without the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub transcoder: TranscoderConfig,
    pub recognition: RecognitionConfig,
    pub storage: StorageConfig,
}

/// HTTP listener settings.
///
/// ## Fields:
/// - `host`: address to bind (`0.0.0.0` listens on all interfaces)
/// - `port`: TCP port number
/// - `max_upload_bytes`: largest accepted `file` field, larger uploads get 413
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Which recognition engine serves the process-wide model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerBackend {
    /// Whisper weights run through candle (default, pure Rust)
    Whisper,
    /// Kaldi/Vosk model directory (needs the `vosk` cargo feature)
    Vosk,
}

impl std::fmt::Display for RecognizerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognizerBackend::Whisper => write!(f, "whisper"),
            RecognizerBackend::Vosk => write!(f, "vosk"),
        }
    }
}

/// Recognition model settings.
///
/// ## Fields:
/// - `backend`: engine used to load `model_dir`
/// - `model_dir`: directory holding the pre-trained model, loaded once at startup
/// - `hub_repo`: HuggingFace repo to fetch Whisper files from when `model_dir` is
///   missing them (empty string disables downloading)
/// - `language`: Whisper language hint such as `"en"` (empty string = none)
/// - `device`: `auto`, `cpu`, `cuda` or `metal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub backend: RecognizerBackend,
    pub model_dir: String,
    pub hub_repo: String,
    pub language: String,
    pub device: String,
}

/// External audio converter settings.
///
/// The converter is invoked as
/// `<program> -y -i <input> -ar <sample_rate> -ac <channels> <output>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub program: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub timeout_secs: u64,
}

/// Chunked recognition loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Frames submitted to the recognizer per read
    pub chunk_frames: usize,
    /// Ask the recognizer for word-level detail (kept, never returned to clients)
    pub enable_words: bool,
}

/// Where per-request temporary files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub temp_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                max_upload_bytes: 100 * 1024 * 1024,
            },
            models: ModelsConfig {
                backend: RecognizerBackend::Whisper,
                model_dir: "./model".to_string(),
                hub_repo: String::new(),
                language: "en".to_string(),
                device: "auto".to_string(),
            },
            transcoder: TranscoderConfig {
                program: "ffmpeg".to_string(),
                sample_rate: 16_000,
                channels: 1,
                timeout_secs: 120,
            },
            recognition: RecognitionConfig {
                chunk_frames: 4000,
                enable_words: true,
            },
            storage: StorageConfig {
                temp_dir: env::temp_dir().to_string_lossy().into_owned(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `STT_MODELS__MODEL_DIR=/srv/models/whisper-base`
    /// - `STT_MODELS__BACKEND=vosk`
    /// - `STT_STORAGE__TEMP_DIR=/var/tmp/stt`
    /// - `PORT=8080`
    ///
    /// ## Why `__` as the separator:
    /// Several keys contain underscores (`model_dir`, `timeout_secs`), so a single
    /// `_` cannot tell a section boundary from part of a key name.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("STT")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero chunk size would spin the recognition loop forever and a zero
    /// timeout would fail every conversion, so these are rejected at startup
    /// rather than on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("Server port cannot be 0");
        }

        if self.server.max_upload_bytes == 0 {
            bail!("Maximum upload size must be greater than 0");
        }

        if self.models.model_dir.trim().is_empty() {
            bail!("Model directory must be set");
        }

        if self.transcoder.program.trim().is_empty() {
            bail!("Transcoder program must be set");
        }

        if self.transcoder.sample_rate == 0 {
            bail!("Transcoder sample rate must be greater than 0");
        }

        if self.transcoder.channels == 0 {
            bail!("Transcoder channel count must be greater than 0");
        }

        if self.transcoder.timeout_secs == 0 {
            bail!("Transcoder timeout must be greater than 0");
        }

        if self.recognition.chunk_frames == 0 {
            bail!("Recognition chunk size must be greater than 0");
        }

        Ok(())
    }
}

impl ModelsConfig {
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.model_dir)
    }

    /// `None` when downloading is disabled.
    pub fn hub_repo(&self) -> Option<&str> {
        Some(self.hub_repo.trim()).filter(|repo| !repo.is_empty())
    }

    pub fn language(&self) -> Option<&str> {
        Some(self.language.trim()).filter(|lang| !lang.is_empty())
    }
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    pub fn temp_path(&self) -> PathBuf {
        PathBuf::from(&self.temp_dir)
    }
}
