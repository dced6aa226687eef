// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use pinksync_protocol::{ErrorReason, FrameError, ServerFrame};

/// Failures the gateway reports to a connection.
///
/// Delivery misses (absent room, offline target) are deliberately not part of
/// this taxonomy: they are silent no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing or unresolvable credential at handshake time.
    Authentication(String),
    /// Unparseable or malformed frame.
    Protocol(FrameError),
    /// Functional frame received before the handshake completed.
    NotAuthenticated,
    /// `authenticate` on a connection that already has an identity.
    AlreadyAuthenticated,
    /// Processing a well-formed authenticated frame failed.
    Handler(String),
}

impl GatewayError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION",
            Self::Protocol(_) => "PROTOCOL",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::AlreadyAuthenticated => "ALREADY_AUTHENTICATED",
            Self::Handler(_) => "HANDLER",
        }
    }

    /// The frame to send back to the offending connection, if any.
    ///
    /// Authentication failures produce `auth_error`; unknown frame types
    /// produce nothing.
    pub fn to_frame(&self) -> Option<ServerFrame> {
        let reason = match self {
            Self::Authentication(message) => {
                return Some(ServerFrame::AuthError { message: message.clone() })
            }
            Self::Protocol(err) => err.reason()?,
            Self::NotAuthenticated => ErrorReason::NotAuthenticated,
            Self::AlreadyAuthenticated => ErrorReason::AlreadyAuthenticated,
            Self::Handler(_) => ErrorReason::InternalError,
        };
        Some(ServerFrame::error(reason, self.client_message()))
    }

    /// Message shown to clients. Handler details stay in the server log.
    fn client_message(&self) -> String {
        match self {
            Self::Handler(_) => "internal error while processing message".to_owned(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication(message) => write!(f, "authentication failed: {message}"),
            Self::Protocol(err) => write!(f, "{err}"),
            Self::NotAuthenticated => f.write_str("authenticate before sending other messages"),
            Self::AlreadyAuthenticated => f.write_str("connection is already authenticated"),
            Self::Handler(detail) => write!(f, "handler failed: {detail}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<FrameError> for GatewayError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err)
    }
}
