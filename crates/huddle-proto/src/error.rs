//! Error types for the wire protocol.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtoError`].
pub type Result<T, E = ProtoError> = std::result::Result<T, E>;

/// Protocol-level failures while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The frame was not valid JSON or did not match any known event shape.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame named an event this protocol does not define.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The frame exceeded the maximum accepted size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}
