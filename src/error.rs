//! Error types and handling for turboq

/// Result type alias for turboq operations
pub type Result<T> = std::result::Result<T, TurboqError>;

/// Error types for queue construction and region management.
///
/// Backpressure is deliberately absent here: a full queue on `prepare` and an
/// empty queue on `fetch` are ordinary flow control, signalled by `None`.
#[derive(Debug, thiserror::Error)]
pub enum TurboqError {
    /// I/O related errors (file operations, mmap, locking)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The mapped bytes do not form a valid queue region
    #[error("invalid queue region: {message}")]
    InvalidRegion { message: String },

    /// An existing backing file does not match the requested geometry
    #[error("region size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Invalid parameters or configuration
    #[error("invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A message does not fit a fixed-size slot
    #[error("message exceeds max message size ({requested} > {max})")]
    MessageTooLarge { requested: usize, max: usize },

    /// The exclusive endpoint role is already held elsewhere
    #[error("queue {role} already exists")]
    EndpointExists { role: &'static str },

    /// Platform-specific errors
    #[error("platform error: {message}")]
    Platform { message: String },
}

impl TurboqError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid region error
    pub fn invalid_region(message: impl Into<String>) -> Self {
        Self::InvalidRegion {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a singleton conflict error
    pub fn endpoint_exists(role: &'static str) -> Self {
        Self::EndpointExists { role }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TurboqError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}
