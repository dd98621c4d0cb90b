// crates/server/src/jobs/mod.rs
//! Background job system for indexing and answer generation.
//!
//! Provides:
//! - `JobRunner` — validates, admits and spawns jobs
//! - `JobStore` — job records by id, written through to SQLite
//! - `JobState` — one job's record plus its progress channel
//! - `AdmissionGate` — one in-flight job per project
//! - `work` — the job bodies

pub mod gate;
pub mod runner;
pub mod state;
pub mod store;
pub mod types;
pub mod work;

pub use gate::{AdmissionGate, ProjectPermit};
pub use runner::{JobRunner, SubmitError, SubmitRequest};
pub use state::{progress_stream, JobState, JobStateError};
pub use store::{JobStore, INTERRUPTED_ERROR};
pub use types::{JobId, JobKind, JobProgress, JobRecord, JobStatus, JobView};
pub use work::{JobError, JobSettings, WorkContext};
