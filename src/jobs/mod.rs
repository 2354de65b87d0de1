//! # Jobs Module
//!
//! Everything about a transcription job's life: the record itself, the
//! state machine it follows, where it is stored, and the task that runs it.
//!
//! ## Key Components:
//! - **model**: `Job`, `JobId`, `JobStatus` and the transition rules
//! - **store**: `JobStore` seam over the durable table
//! - **manager**: `JobManager`, the single writer keeping store and index in step
//! - **runner**: `JobRunner`, background execution with bounded concurrency
//!
//! ## State Machine:
//! ```text
//! uploaded ──> processing ──> completed
//!    │              │
//!    └──────────────┴───────> failed
//! ```

pub mod error;
pub mod manager;
pub mod model;
pub mod runner;
pub mod store;

pub use error::JobError;
pub use manager::JobManager;
pub use model::{JobId, JobStatus, JobSummary};
pub use runner::{spawn_outcome_monitor, JobRunner};
pub use store::JobStore;
