//! Error taxonomy shared by every hcu crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HcuError>;

#[derive(Debug, Error)]
pub enum HcuError {
    /// Unregistered worker or missing entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity failed its field-presence rules before persistence.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Plugin or name lookup could not be resolved.
    #[error("could not resolve {0}")]
    Resolution(String),

    /// Payload did not match the expected wire shape.
    #[error("could not decode {0}")]
    Decode(String),

    /// Reconciliation finished, but some link operations failed.
    #[error("one or more links failed ({failed} of {total} operations)")]
    PartialFailure { failed: usize, total: usize },

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HcuError {
    /// Check a required string field, the way entity validators do.
    pub fn require(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            Err(HcuError::Validation(format!("{field} must not be blank")))
        } else {
            Ok(())
        }
    }
}
