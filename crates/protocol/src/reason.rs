// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable `reason` carried by server `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// A functional frame arrived before the handshake completed.
    NotAuthenticated,
    /// The frame was not parseable JSON.
    InvalidJson,
    /// The frame parsed but lacks a `type` or has ill-typed fields.
    InvalidMessage,
    /// Processing a well-formed frame failed on the server.
    InternalError,
    /// `authenticate` was sent on a connection that already has an identity.
    AlreadyAuthenticated,
    /// Another connection authenticated as the same identity.
    SessionReplaced,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InvalidJson => "invalid_json",
            Self::InvalidMessage => "invalid_message",
            Self::InternalError => "internal_error",
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::SessionReplaced => "session_replaced",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
