//! Typed errors for session construction and tuning data.

use thiserror::Error;

/// Fatal configuration errors. These are raised once at construction time;
/// the simulation never starts with a broken setup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no spawn points configured")]
    NoSpawnPoints,
    #[error("invalid capsule dimensions: radius {radius}, height {height}")]
    InvalidCapsule { radius: f32, height: f32 },
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },
    #[error("tuning file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
