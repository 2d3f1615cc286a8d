//! Typed errors surfaced across the host's module boundaries.

use thiserror::Error;

/// A profile could not be loaded or failed validation. These refuse the
/// transition to RUNNING; the engine stays IDLE.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profile JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported profile version {0}")]
    Version(u64),

    #[error("profile contains no points or segments")]
    Empty,

    #[error("segment {index}: {reason}")]
    Segment { index: usize, reason: String },
}
