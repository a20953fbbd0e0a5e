use thiserror::Error;

/// Why a line produced no output.
///
/// Every variant leads to the same outcome (the line is dropped); they are
/// kept apart only so the reason can be logged.
#[derive(Debug, Error)]
pub enum Skip {
    #[error("invalid json: {0}")]
    Json(#[source] serde_json::Error),

    #[error("top-level value is not an object")]
    NotAnObject,

    #[error("logger {0:?} is not the access logger")]
    OtherLogger(Option<String>),

    #[error("unexpected field type: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("header {0} is not a list of strings")]
    Header(&'static str),

    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(f64),
}
