// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;

use mqtt_codec::{ConnectReturnCode, DecodeError, EncodeError};
use thiserror::Error;

/// Errors returned by the request engine, connection supervisor and the
/// `Client` facade built on top of them.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("malformed packet on the wire: {0}")]
    Protocol(#[from] DecodeError),

    #[error("packet could not be encoded: {0}")]
    Encode(#[from] EncodeError),

    #[error("broker refused the connection: {0:?}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("connection closed before the request completed")]
    ConnectionClosed,

    #[error("request submitted while not connected")]
    NotConnected,

    #[error("request timed out")]
    Timeout,

    #[error("no pingresp received within the keep-alive timeout")]
    KeepAliveTimeout,

    #[error("no packet identifier is available; too many in-flight requests")]
    NoAvailablePacketIdentifier,

    #[error("client is shutting down")]
    ClientShutdown,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid client id: must be 1-23 bytes")]
    InvalidClientId,

    #[error("engine task is no longer running")]
    EngineGone,
}

impl ClientError {
    /// True for CONNACK codes 4 (bad username/password) and 5 (not
    /// authorized), where the supervisor must not retry the reconnect loop.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::ConnectionRefused(code) if code.is_auth_failure())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ClientError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ClientError::EngineGone
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ClientError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ClientError::EngineGone
    }
}
