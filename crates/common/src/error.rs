// Error types shared across the protocol layer.

use thiserror::Error;

/// Violation of the length-prefixed JSON wire protocol.
///
/// Protocol errors are fatal to the endpoint that observed them: the byte
/// stream can no longer be trusted to be frame-aligned, so serve loops exit
/// and callers discard the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The header line was not a decimal byte count.
    #[error("expected a byte count from the remote side, received {input:?} instead")]
    BadByteCount { input: String },

    /// The payload was not valid JSON.
    #[error("failed to decode message {message:?} from the remote side as JSON: {source}")]
    BadPayload {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded for the wire.
    #[error("failed to encode message as JSON: {0}")]
    Encode(#[source] serde_json::Error),

    /// The transport failed mid-frame.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a caller-side remote method call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote side answered with `success=false`.
    #[error("remote method failed: {0}")]
    RemoteMethodFailed(String),

    /// The wire protocol was violated; the endpoint must be discarded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport closed before a response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

/// Failure to resolve or run a command script.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no such command: {0}")]
    UnknownCommand(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to feed input to `{command}`: {source}")]
    Input {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` failed with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("command `{command}` produced output that is not valid UTF-8")]
    NonUtf8Output { command: String },

    #[error("failed to collect output of `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
