//! Errors raised by the detection chain.
//!
//! Every variant is configuration-fatal: the same config would fail on
//! every subsequent frame too. Transient conditions (degenerate antenna
//! snapshots, empty detections) are reported through output fields instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported LVDS topology: {lanes} lanes (only 2 are supported)")]
    UnsupportedTopology { lanes: usize },

    #[error("{stage}: shape mismatch, expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid radar configuration: {0}")]
    InvalidConfig(#[from] sensor_models::ConfigIssue),
}

pub type Result<T> = std::result::Result<T, DetectError>;
