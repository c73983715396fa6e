use thiserror::Error;

/// Errors raised while validating inputs or running an evaluation.
///
/// Every variant is produced before any accumulator is touched, so a failed
/// call never leaves a partially filled matrix behind.
#[derive(Debug, Error)]
pub enum Error {
    #[error("number of predictions ({predictions}) and targets ({targets}) must be equal")]
    LengthMismatch { predictions: usize, targets: usize },

    #[error("{what} at index {index} must have shape (N, {expected}), got (_, {found})")]
    InvalidShape {
        what: &'static str,
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("{what} must have at least {expected} columns, got {found}")]
    TooFewColumns {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("detections are missing `{field}`, which is required for this metric")]
    MissingField { field: &'static str },

    #[error("`{field}` has {found} entries but detections hold {expected} boxes")]
    FieldLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("class id {class_id} is outside of 0..{num_classes}")]
    ClassIdOutOfRange { class_id: i64, num_classes: usize },

    #[error("class lists differ: expected {expected:?}, found {found:?}")]
    ClassMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid evaluation parameters: {0}")]
    InvalidParams(String),

    #[error("no annotations found for image '{0}'")]
    MissingAnnotations(String),

    #[error("detector callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
