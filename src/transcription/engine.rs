//! # Transcription Engine
//!
//! The boundary between the job runner and whatever turns audio into text.
//! The runner only needs one operation: give the engine an absolute file path
//! and get back either a transcript or a diagnostic.
//!
//! ## Result Contract:
//! - **Success**: a non-empty transcript
//! - **Failure**: an [`EngineError`] whose `Display` text is shown to users as
//!   the job's `error`

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::OutputFormat;

pub const UNKNOWN_FAILURE: &str = "Transcription failed with unknown error";

/// Anything that can transcribe a local audio/video file.
///
/// ## Thread Safety:
/// Engines are shared across runner tasks behind an `Arc`, so they must be
/// `Send + Sync`. Cancellation happens by dropping the returned future.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<String, EngineError>;

    /// Short label used in logs and metrics.
    fn name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be started at all
    #[error("Failed to start transcription engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran and reported failure; `diagnostic` is its own message
    #[error("{diagnostic}")]
    Failed {
        code: Option<i32>,
        diagnostic: String,
    },

    /// The engine claimed success but its output broke the result contract
    #[error("Failed to parse transcription: {0}")]
    InvalidOutput(String),

    #[error("Transcription engine returned no text")]
    EmptyTranscript,
}

/// JSON reply shape for engines configured with `output_format = "json"`.
#[derive(Debug, Deserialize)]
struct EngineReply {
    text: Option<String>,
    error: Option<String>,
}

/// Applies the result contract to a successful run's stdout.
pub fn parse_output(stdout: &str, format: OutputFormat) -> Result<String, EngineError> {
    let text = match format {
        OutputFormat::Text => stdout.trim().to_string(),
        OutputFormat::Json => {
            let reply: EngineReply = serde_json::from_str(stdout.trim())
                .map_err(|e| EngineError::InvalidOutput(e.to_string()))?;

            if let Some(diagnostic) = reply.error.filter(|e| !e.trim().is_empty()) {
                return Err(EngineError::Failed {
                    code: Some(0),
                    diagnostic,
                });
            }

            reply
                .text
                .ok_or_else(|| EngineError::InvalidOutput("missing \"text\" field".to_string()))?
                .trim()
                .to_string()
        }
    };

    if text.is_empty() {
        return Err(EngineError::EmptyTranscript);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_output_is_trimmed() {
        let text = parse_output("  hello world\n", OutputFormat::Text).unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_empty_output_is_failure() {
        assert!(matches!(
            parse_output(" \n", OutputFormat::Text),
            Err(EngineError::EmptyTranscript)
        ));
        assert!(matches!(
            parse_output(r#"{"text": ""}"#, OutputFormat::Json),
            Err(EngineError::EmptyTranscript)
        ));
    }

    #[test]
    fn test_json_output() {
        let text = parse_output(r#"{"text": "hello world"}"#, OutputFormat::Json).unwrap();
        assert_eq!(text, "hello world");

        let err = parse_output(r#"{"error": "unsupported codec"}"#, OutputFormat::Json)
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported codec");

        assert!(matches!(
            parse_output("hello world", OutputFormat::Json),
            Err(EngineError::InvalidOutput(_))
        ));
        assert!(matches!(
            parse_output("{}", OutputFormat::Json),
            Err(EngineError::InvalidOutput(_))
        ));
    }
}
