//! Error types for call signaling

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a local media source can refuse to hand out a media handle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    /// No device satisfies the requested constraints
    #[error("no media device matches the constraints: {0}")]
    NotFound(String),

    /// The user or platform denied access to the device
    #[error("permission to use media device denied: {0}")]
    PermissionDenied(String),

    /// Any other acquisition failure
    #[error("media acquisition failed: {0}")]
    Other(String),
}

/// Errors that can occur while running a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local media could not be acquired
    #[error("Acquisition error: {0}")]
    AcquisitionError(#[from] AcquisitionError),

    /// Description or candidate rejected by the peer connection
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// Simultaneous offer collision
    #[error("Glare: {0}")]
    GlareError(String),

    /// SDP is missing the line an edit is anchored on
    #[error("Malformed input: {0}")]
    MalformedInputError(String),

    /// Not enough history to compute a bitrate
    #[error("No previous sample: {0}")]
    NoPreviousSampleError(String),

    /// Message that is not valid in the current negotiation state
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Recording collaborator error
    #[error("Recording error: {0}")]
    RecordingError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// The session has already been hung up
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Errors that are shown to the user rather than only logged
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::AcquisitionError(_))
    }

    /// Errors that move a negotiating or connected session to Failed
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::NegotiationError(_) | Error::MalformedInputError(_)
        )
    }

    /// Errors caused by the remote endpoint breaking the exchange rules
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::GlareError(_) | Error::UnexpectedMessage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::GlareError("offer while another is pending".to_string());
        assert_eq!(err.to_string(), "Glare: offer while another is pending");

        let err: Error = AcquisitionError::NotFound("camera".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Acquisition error: no media device matches the constraints: camera"
        );
    }

    #[test]
    fn test_user_facing() {
        assert!(Error::from(AcquisitionError::PermissionDenied("mic".into())).is_user_facing());
        assert!(!Error::NegotiationError("bad sdp".into()).is_user_facing());
        assert!(!Error::GlareError("x".into()).is_user_facing());
    }

    #[test]
    fn test_fatal_to_session() {
        assert!(Error::NegotiationError("rejected".into()).is_fatal_to_session());
        assert!(Error::MalformedInputError("no c= line".into()).is_fatal_to_session());
        assert!(!Error::GlareError("x".into()).is_fatal_to_session());
        assert!(!Error::NoPreviousSampleError("x".into()).is_fatal_to_session());
    }

    #[test]
    fn test_protocol_error() {
        assert!(Error::GlareError("x".into()).is_protocol_error());
        assert!(Error::UnexpectedMessage("answer".into()).is_protocol_error());
        assert!(!Error::SignalingError("x".into()).is_protocol_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError(_)));
    }
}
