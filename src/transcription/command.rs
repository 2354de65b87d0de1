//! External-program transcription engine.
//!
//! Runs `program args... <absolute path>` and reads the transcript from
//! stdout. The child is killed if the future is dropped, which is how the
//! runner's timeout stops a hung engine.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::engine::{parse_output, EngineError, TranscriptionEngine, UNKNOWN_FAILURE};
use crate::config::{OutputFormat, TranscriptionConfig};

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    format: OutputFormat,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, format: OutputFormat) -> Self {
        Self {
            program: program.into(),
            args,
            format,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.output_format)
    }
}

#[async_trait]
impl TranscriptionEngine for CommandEngine {
    async fn transcribe(&self, path: &Path) -> Result<String, EngineError> {
        tracing::debug!(program = %self.program, path = %path.display(), "Running transcription engine");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "Transcription engine stderr");
        }

        if !output.status.success() {
            let diagnostic = match stderr.trim() {
                "" => UNKNOWN_FAILURE.to_string(),
                msg => msg.to_string(),
            };
            return Err(EngineError::Failed {
                code: output.status.code(),
                diagnostic,
            });
        }

        parse_output(&stdout, self.format)
    }

    fn name(&self) -> &str {
        &self.program
    }
}
