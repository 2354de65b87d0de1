//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, SECRET_KEY, MAX_FILE_SIZE)
//! 2. Environment variables (APP_SERVER__PORT, APP_TRANSCRIPTION__TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, storage, transcription, ...)
/// keeps each concern readable and lets config.toml use one table per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transcription: TranscriptionConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Where uploads and the job database live, and what uploads are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that receives uploaded media files
    pub upload_dir: PathBuf,

    /// SQLite file holding the durable job table
    pub database_path: PathBuf,

    /// Largest accepted upload, in bytes
    pub max_file_size_bytes: u64,

    /// Lower-case extensions (with the leading dot) accepted for upload
    pub allowed_extensions: Vec<String>,
}

/// Format the external transcription program writes on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Whole stdout is the transcript
    Text,
    /// stdout is a JSON object with a `text` (or `error`) field
    Json,
}

/// External transcription engine settings.
///
/// ## How the engine is invoked:
/// `program args... /absolute/path/to/upload.wav`
///
/// The absolute path of the uploaded file is always appended as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub program: String,
    pub args: Vec<String>,

    /// Upper bound on a single engine run; the job fails when it is exceeded
    pub timeout_secs: u64,

    /// How many jobs may run the engine at the same time
    pub max_concurrent_jobs: usize,

    pub output_format: OutputFormat,
}

/// Authentication and browser access settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Bearer token required on API calls. `None` disables authentication.
    pub api_token: Option<String>,

    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

/// Per-client request budgets, counted per minute and per remote IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub uploads_per_minute: u32,
    pub reads_per_minute: u32,
    pub deletes_per_minute: u32,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
                database_path: PathBuf::from("transcriptions.db"),
                max_file_size_bytes: 100 * 1024 * 1024,  // 100MB
                allowed_extensions: [".mp3", ".wav", ".m4a", ".mp4"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
            },
            transcription: TranscriptionConfig {
                program: "python".to_string(),
                args: vec!["whisper_api.py".to_string()],
                timeout_secs: 30 * 60,   // Long recordings on CPU can take a while
                max_concurrent_jobs: 2,
                output_format: OutputFormat::Text,
            },
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig {
                uploads_per_minute: 5,
                reads_per_minute: 30,
                deletes_per_minute: 10,
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT, SECRET_KEY and MAX_FILE_SIZE
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_TRANSCRIPTION__PROGRAM=/usr/local/bin/whisper-cli`: Override engine program
    /// - `APP_TRANSCRIPTION__MAX_CONCURRENT_JOBS=4`: Allow more parallel jobs
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `SECRET_KEY=...`: API bearer token
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix.
            // Double underscore separates nesting so field names can keep single underscores.
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(token) = env::var("SECRET_KEY") {
            settings = settings.set_override("security.api_token", token)?;
        }

        if let Ok(max_size) = env::var("MAX_FILE_SIZE") {
            settings = settings.set_override("storage.max_file_size_bytes", max_size)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("Max file size must be greater than 0"));
        }

        if self.storage.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one upload extension must be allowed"));
        }

        if let Some(ext) = self
            .storage
            .allowed_extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(anyhow::anyhow!(
                "Allowed extension '{}' must start with '.'",
                ext
            ));
        }

        if self.transcription.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription program cannot be empty"));
        }

        if self.transcription.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Transcription timeout must be greater than 0"));
        }

        if self.transcription.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        let limits = &self.rate_limit;
        if limits.uploads_per_minute == 0
            || limits.reads_per_minute == 0
            || limits.deletes_per_minute == 0
        {
            return Err(anyhow::anyhow!("Rate limits must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Engine timeout as a `Duration`.
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription.timeout_secs)
    }
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.max_file_size_bytes, 100 * 1024 * 1024);
        assert!(config.storage.allowed_extensions.contains(&".wav".to_string()));
        assert!(config.security.api_token.is_none());
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;  // Invalid port
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.allowed_extensions = vec!["wav".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.reads_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_format_parsing() {
        let format: OutputFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, OutputFormat::Json);
        assert!(serde_json::from_str::<OutputFormat>("\"xml\"").is_err());
    }

    #[test]
    fn test_timeout_duration() {
        let mut config = AppConfig::default();
        config.transcription.timeout_secs = 90;
        assert_eq!(config.transcription_timeout(), Duration::from_secs(90));
    }
}
