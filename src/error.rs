//! Error kinds shared by the codec, FSM and runtime layers.

use thiserror::Error;

/// Errors the codec, framer and FSM layers can raise.
///
/// `SocketClosed` and `ProtocolViolation` are fatal to the session that
/// raised them; `Idle` is the signaling value the FSM returns when it has
/// decided to terminate, so the peering runtime can cancel its sibling
/// tasks deterministically instead of unwinding through a panic.
#[derive(Debug, Error)]
pub enum BgpError {
    #[error("socket closed: {0}")]
    SocketClosed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("session idle: {0}")]
    Idle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BgpError {
    pub fn protocol(message: impl Into<String>) -> Self {
        BgpError::ProtocolViolation(message.into())
    }

    pub fn socket_closed(message: impl Into<String>) -> Self {
        BgpError::SocketClosed(message.into())
    }

    pub fn idle(message: impl Into<String>) -> Self {
        BgpError::Idle(message.into())
    }
}

pub type BgpResult<T> = Result<T, BgpError>;
