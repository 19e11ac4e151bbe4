// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio_tungstenite::tungstenite;

use codec::ConnectReturnCode;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect called while a session is already established.
    AlreadyConnected,

    /// Connect called while a connect is already in progress.
    Connecting,

    /// Operation requires an established session.
    NotConnected,

    /// Operation is not permitted in the current client state.
    InvalidState,

    /// The client engine task has terminated.
    NotRunning,

    /// Invariant violation inside the client.
    InternalError,

    /// The transport could not be established.
    ConnectFailure,

    /// The server refused the CONNECT, with the CONNACK return code.
    ConnectionRefused(ConnectReturnCode),

    /// Sending or receiving on the transport failed; the session is
    /// torn down.
    CommunicationFailure,

    /// The server sent a malformed or protocol-violating packet; the
    /// session is torn down.
    ServerMessageFailure,

    /// Invalid argument passed by the caller.
    InvalidParameter,

    /// The receive queue is empty.
    NoMessage,

    /// QoS 2 delivery is not supported.
    QoS2NotSupported,

    /// A caller-supplied buffer is too small for the queued message.
    InsufficientBuffer,

    /// Packet failed to decode.
    InvalidPacket,

    /// A read ended in the middle of a control packet.
    PartialPacket,

    /// The transmit queue reached its configured depth limit.
    QueueFull,

    /// A wait option elapsed before the operation completed.
    Timeout,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Error occurred while performing I/O.
    IoError,

    /// Cert files error.
    CertError,

    /// Socket stream error.
    SocketError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::SocketError, format!("Websocket error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::new(ErrorKind::NotRunning, "Client engine is not running")
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_err: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::new(ErrorKind::NotRunning, "Client engine dropped the request")
    }
}
