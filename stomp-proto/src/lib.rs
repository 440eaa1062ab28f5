pub mod codec;
pub mod frame;
pub mod framing;
pub mod heartbeat;
pub mod registry;
pub mod ring;

pub use codec::*;
pub use frame::*;
pub use framing::*;
pub use heartbeat::*;
pub use registry::*;
pub use ring::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Buffer(#[from] RingBufferError),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(String),

    #[error("Missing mandatory header: {0}")]
    MissingMandatoryHeader(String),

    #[error("Malformed header {header}: {reason}")]
    MalformedHeader { header: String, reason: String },

    #[error("Frame {0} does not carry a body")]
    BodyNotAllowed(String),

    #[error("Frame {0} cannot be sent by a client")]
    InvalidDirection(String),

    #[error("No data from server within {0} ms")]
    HeartbeatTimeout(u64),

    #[error("Receive buffer of {0} bytes exhausted before a complete frame arrived")]
    ReceiveBufferExhausted(usize),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Receive loop failed: {0}")]
    ReceiveLoopFailed(String),

    #[error("Timed out waiting for CONNECTED")]
    HandshakeTimeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Cannot change this setting while connected")]
    AlreadyConnected,

    #[error("Not subscribed with id: {0}")]
    NotSubscribed(String),
}

impl ProtocolError {
    pub(crate) fn malformed(header: &str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedHeader {
            header: header.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
