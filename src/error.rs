//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching, loading or capturing a page
#[derive(Error, Debug)]
pub enum Error {
    /// The proxy answered with a non-success status
    #[error("Proxy request failed: {status} {status_text}")]
    HttpStatus { status: u16, status_text: String },

    /// Transport-level failure talking to the proxy
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The sandbox policy (or a consumed load) prevented reading the frame document
    #[error("Could not access frame content: {0}")]
    FrameAccess(String),

    /// Rasterizing or encoding the frame failed
    #[error("Capture failed: {0}")]
    CaptureError(String),

    /// A render is already in flight
    #[error("A render is already in progress")]
    Busy,

    /// The render was overtaken by a newer one and its result was discarded
    #[error("Render superseded by a newer request")]
    Superseded,

    /// Download requested before any render produced a result
    #[error("No captured result is available")]
    NoResult,

    /// Invalid configuration or request value
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The message shown in the pipeline's `Error` state.
    ///
    /// Fetch failures keep the status code/text, frame failures collapse to a
    /// generic line, capture failures keep the underlying reason.
    pub fn user_message(&self) -> String {
        match self {
            Error::HttpStatus { status, status_text } => {
                format!("Failed to fetch URL: {} {}", status, status_text)
            }
            Error::NetworkError(msg) => format!("Failed to fetch URL: {}", msg),
            Error::FrameAccess(_) => "Could not access frame content".to_string(),
            Error::CaptureError(msg) => format!("Failed to generate image: {}", msg),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::CaptureError(err.to_string())
    }
}
