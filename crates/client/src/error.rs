// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Failures reported to callers of the client API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// An outgoing operation was attempted while not connected.
    NotConnected,
    /// `connect` was called while another attempt is in flight.
    ConnectInProgress,
    /// The gateway answered `auth_error`.
    AuthRejected(String),
    /// Opening or using the transport failed.
    Transport(String),
    /// Transport or handshake did not finish in time.
    Timeout,
    /// The connection closed before the handshake completed, or the attempt
    /// was superseded by `disconnect`.
    Closed,
    InvalidUrl(String),
    /// The stats request failed.
    Http(String),
}

impl ClientError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::ConnectInProgress => "CONNECT_IN_PROGRESS",
            Self::AuthRejected(_) => "AUTH_REJECTED",
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout => "TIMEOUT",
            Self::Closed => "CLOSED",
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::Http(_) => "HTTP",
        }
    }

    /// Whether retrying with the same credential is pointless.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::InvalidUrl(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("not connected"),
            Self::ConnectInProgress => f.write_str("connection attempt already in progress"),
            Self::AuthRejected(message) => write!(f, "authentication rejected: {message}"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            Self::Timeout => f.write_str("timed out"),
            Self::Closed => f.write_str("connection closed"),
            Self::InvalidUrl(url) => write!(f, "invalid gateway url: {url}"),
            Self::Http(detail) => write!(f, "stats request failed: {detail}"),
        }
    }
}

impl std::error::Error for ClientError {}
