//! Error types for NETCONF sessions.
//!
//! This module defines all errors that can occur while establishing the SSH
//! transport, negotiating capabilities, framing messages and correlating
//! RPC replies.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur during NETCONF session management.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// The client configuration failed validation.
    #[error("invalid netconf config - {0}")]
    InvalidConfig(String),

    /// Reading from, writing to or shutting down the transport failed.
    ///
    /// Fatal to the session.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The incoming byte stream violated the negotiated framing.
    ///
    /// Covers malformed chunk headers, oversized chunks and messages that
    /// never terminate within the configured byte budget. Fatal to the session.
    #[error("framing error: {0}")]
    Framing(String),

    /// A complete frame did not contain a valid NETCONF envelope.
    #[error("protocol content error: {0}")]
    ProtocolContent(String),

    /// The `<hello>` exchange failed. The session never became active.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The operation is not permitted in the current lifecycle state.
    ///
    /// Nothing was written to the transport.
    #[error("{operation} not allowed while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// No reply arrived before the request deadline.
    #[error("rpc message-id {message_id} timed out")]
    Timeout { message_id: u64 },

    /// The session closed or failed while the request was pending.
    #[error("session terminated: {0}")]
    SessionTerminated(String),

    /// The per-session message-id counter overflowed.
    #[error("message-id space exhausted")]
    MessageIdExhausted,

    /// The graceful `<close-session>` handshake did not complete.
    ///
    /// The transport has been forced closed and the session marked failed.
    #[error("failed to gracefully close session - {0}")]
    CloseFailed(String),

    /// The SSH connection was not established in time.
    #[error("unable to dial host - timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// No recorded reply matched during offline replay.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl NetconfError {
    /// Returns true if this error terminates the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetconfError::Transport(_)
                | NetconfError::Framing(_)
                | NetconfError::ProtocolContent(_)
                | NetconfError::Negotiation(_)
                | NetconfError::MessageIdExhausted
                | NetconfError::CloseFailed(_)
                | NetconfError::Ssh2Error(_)
                | NetconfError::RusshError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_state_errors_are_not_fatal() {
        assert!(!NetconfError::Timeout { message_id: 7 }.is_fatal());
        assert!(
            !NetconfError::InvalidState {
                operation: "submit",
                state: SessionState::Closed,
            }
            .is_fatal()
        );
    }

    #[test]
    fn framing_errors_are_fatal() {
        assert!(NetconfError::Framing("bad header".to_string()).is_fatal());
        assert!(NetconfError::ProtocolContent("no root".to_string()).is_fatal());
    }

    #[test]
    fn state_error_names_operation_and_state() {
        let err = NetconfError::InvalidState {
            operation: "submit",
            state: SessionState::Closing,
        };
        assert_eq!(err.to_string(), "submit not allowed while session is closing");
    }
}
