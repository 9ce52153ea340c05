use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// One problem found while validating an element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" {}", self.field, self.message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid element: {0}")]
    Validation(ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    #[error("malformed version: {0}")]
    MalformedVersion(String),
    #[error("unknown batch op type: {0}")]
    UnknownOpType(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("index corrupted: {0}")]
    IndexCorrupted(String),
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than a storage or index fault.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::InvalidBoundingBox(_)
                | Error::MalformedVersion(_)
                | Error::UnknownOpType(_)
        )
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}
