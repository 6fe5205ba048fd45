//! Error types for camera control and telemetry.

/// Result type alias
pub type Result<T> = std::result::Result<T, CameraError>;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Bad credentials. Fatal to the current session, never retried.
    #[error("Authentication rejected by camera at {0}")]
    Authentication(String),

    /// HTTP client error (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket error on the telemetry port
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Camera refused a configuration write after every retry
    #[error("Camera rejected request: {0}")]
    Rejected(String),

    /// Malformed region or telemetry payload
    #[error("Parse error: {0}")]
    ProtocolParse(String),
}

impl CameraError {
    /// Recoverable link failures; the caller may retry or report a degraded stream.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CameraError::Http(_)
                | CameraError::Io(_)
                | CameraError::Timeout(_)
                | CameraError::Rejected(_)
        )
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, CameraError::Authentication(_))
    }
}
