//! # Transcription Module
//!
//! Speech-to-text happens outside this process. This module defines the
//! engine contract the job runner depends on and the implementation that
//! shells out to an external program.
//!
//! ## Key Components:
//! - **engine**: `TranscriptionEngine` trait, `EngineError`, stdout result contract
//! - **command**: `CommandEngine`, runs the configured program per job

pub mod command;     // External program invocation
pub mod engine;      // Engine trait and result contract

pub use command::CommandEngine;
pub use engine::{EngineError, TranscriptionEngine};
