// crates/core/src/error.rs
use thiserror::Error;

/// Errors that can occur when decoding a progress frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Empty progress frame")]
    Empty,

    #[error("Malformed progress frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
