/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The first frame does not start with the marker sequence or is too
    /// short to hold a header.
    #[error("malformed frame header (expected 0x3f2323 \"?##\" marker)")]
    MalformedHeader,

    /// The frame stream ended before the declared payload length was
    /// accumulated.
    #[error("truncated message ({received} of {expected} payload bytes)")]
    TruncatedMessage { expected: usize, received: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The configured frame size cannot hold a first-frame header.
    #[error("frame size too small ({size} bytes, min {min})")]
    FrameSizeTooSmall { size: usize, min: usize },

    /// The dictionary has no entry for the received message type code.
    #[error("unknown message type code {0}")]
    UnknownMessageType(u16),

    /// The dictionary has no entry for the given message name.
    #[error("unknown message name '{0}'")]
    UnknownMessageName(String),
}

pub type Result<T> = std::result::Result<T, WireError>;
