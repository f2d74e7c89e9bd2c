// crates/core/src/lib.rs
//! Core data model for tracking server-executed jobs from the client side.
//!
//! - [`JobProgress`]: the live record for one tracked job
//! - [`ProgressFrame`]: one partial update from a progress stream
//! - [`JobOutcome`]: the terminal result delivered to subscribers
//! - [`ProgressView`]: UI-ready projection of a record

pub mod error;
pub mod outcome;
pub mod progress;
pub mod projection;

pub use error::FrameError;
pub use outcome::{FailureReason, JobOutcome, CONNECTION_LOST_MESSAGE};
pub use progress::{JobProgress, JobStatus, ProgressFrame};
pub use projection::{percent_complete, ProgressView, DEFAULT_MESSAGE};
