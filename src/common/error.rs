//! Error types shared across the crate.

use thiserror::Error;

/// Errors reported by the pass driver entry points.
#[derive(Debug, Error)]
pub enum PassError {
    /// The pipeline named a pass that is not in the registry.
    #[error("unknown pass name: {0}")]
    UnknownPass(String),
}
