//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - built-in defaults
//! - `config.toml` (optional)
//! - environment variables with the `APP_` prefix
//! - `HOST` / `PORT` overrides used by deployment platforms
//!
//! Configuration is validated once at startup so a bad deployment fails
//! immediately rather than on the first transcription request.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External speech-engine settings.
///
/// ## Fields:
/// - `binary`: explicit path to the engine executable; when unset the engine
///   is located by probing `binary_candidates` beneath `work_dir` and then
///   falling back to `fallback_command` on `PATH`
/// - `default_model` / `default_language`: used when a request omits them
/// - `trimmer`: the audio trimmer executable used for preview mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub binary: Option<String>,
    pub binary_candidates: Vec<String>,
    pub fallback_command: String,
    pub default_model: String,
    pub default_language: String,
    pub trimmer: String,
}

/// Filesystem layout settings.
///
/// ## Fields:
/// - `uploads_dir`: where uploaded audio payloads are stored
/// - `exports_dir`: root of the versioned export archive
/// - `work_dir`: working directory the engine runs in; its transcript
///   output files are discovered here after each run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: String,
    pub exports_dir: String,
    pub work_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            engine: EngineConfig {
                binary: None,
                // Probed in order beneath work_dir; mirrors the virtualenv
                // layouts the engine is normally installed into.
                binary_candidates: vec![
                    "whisper-env/bin/whisper".to_string(),
                    "whisper-env/whisper-env/bin/whisper".to_string(),
                ],
                fallback_command: "whisper".to_string(),
                default_model: "medium".to_string(),
                default_language: "English".to_string(),
                trimmer: "ffmpeg".to_string(),
            },
            storage: StorageConfig {
                uploads_dir: "uploads".to_string(),
                exports_dir: "exports".to_string(),
                work_dir: ".".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and environment.
    ///
    /// Environment examples:
    /// - `APP_SERVER_HOST=0.0.0.0`
    /// - `APP_SERVER_PORT=9000`
    /// - `HOST` / `PORT` (deployment-platform shorthand, highest priority)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration can actually run a transcription.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.engine.binary.is_none()
            && self.engine.binary_candidates.is_empty()
            && self.engine.fallback_command.is_empty()
        {
            return Err(anyhow::anyhow!(
                "No engine binary, candidate paths, or fallback command configured"
            ));
        }

        if self.storage.uploads_dir.is_empty() || self.storage.exports_dir.is_empty() {
            return Err(anyhow::anyhow!("Storage directories cannot be empty"));
        }

        Ok(())
    }

    /// Create the upload/export/work directories if they do not exist yet.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.uploads_dir)?;
        std::fs::create_dir_all(&self.storage.exports_dir)?;
        if self.storage.work_dir != "." {
            std::fs::create_dir_all(&self.storage.work_dir)?;
        }
        Ok(())
    }
}
