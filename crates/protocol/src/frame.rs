// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::reason::ErrorReason;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    JoinRoom {
        room: String,
    },
    LeaveRoom {
        room: String,
    },
    Broadcast {
        room: String,
        #[serde(default)]
        content: Value,
    },
    DirectMessage {
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        #[serde(default)]
        content: Value,
    },
    AccessibilityUpdate {
        #[serde(default)]
        preferences: Value,
    },
    Ping {},
}

impl ClientFrame {
    /// Every `type` tag the gateway recognizes from clients.
    pub const TYPES: &'static [&'static str] = &[
        "authenticate",
        "join_room",
        "leave_room",
        "broadcast",
        "direct_message",
        "accessibility_update",
        "ping",
    ];

    /// The wire `type` tag of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::Broadcast { .. } => "broadcast",
            Self::DirectMessage { .. } => "direct_message",
            Self::AccessibilityUpdate { .. } => "accessibility_update",
            Self::Ping {} => "ping",
        }
    }

    /// Classify an already-parsed JSON value.
    ///
    /// Distinguishes missing tags, unknown types (which callers ignore) and
    /// malformed known types, which serde's tagged-enum error alone cannot do.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => return Err(FrameError::MissingType),
        };
        if !Self::TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| FrameError::Invalid { kind, detail: e.to_string() })
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Authenticated {
        #[serde(rename = "userId")]
        user_id: String,
    },
    AuthError {
        message: String,
    },
    RoomJoined {
        room: String,
        #[serde(rename = "memberCount")]
        member_count: usize,
    },
    UserJoined {
        #[serde(rename = "userId")]
        user_id: String,
        room: String,
    },
    Broadcast {
        #[serde(rename = "userId")]
        user_id: String,
        room: String,
        content: Value,
        timestamp: String,
    },
    DirectMessage {
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        content: Value,
        timestamp: String,
    },
    Pong {},
    Error {
        reason: ErrorReason,
        message: String,
    },
}

impl ServerFrame {
    /// Build an `error` frame.
    pub fn error(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self::Error { reason, message: message.into() }
    }
}

// ---------------------------------------------------------------------------
// Inbound parsing
// ---------------------------------------------------------------------------

/// Why an inbound text frame could not be turned into a [`ClientFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not parseable as JSON at all.
    InvalidJson(String),
    /// Parseable, but not an object with a string `type`.
    MissingType,
    /// A `type` the gateway does not handle.
    UnknownType(String),
    /// A known `type` whose fields are missing or ill-typed.
    Invalid { kind: String, detail: String },
}

impl FrameError {
    /// The `error` reason to report for this failure, or `None` when the frame
    /// should be dropped without a reply.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            Self::InvalidJson(_) => Some(ErrorReason::InvalidJson),
            Self::MissingType | Self::Invalid { .. } => Some(ErrorReason::InvalidMessage),
            Self::UnknownType(_) => None,
        }
    }

    /// The frame `type`, when one could be read.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::UnknownType(kind) | Self::Invalid { kind, .. } => Some(kind),
            Self::InvalidJson(_) | Self::MissingType => None,
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(detail) => write!(f, "invalid JSON: {detail}"),
            Self::MissingType => f.write_str("frame has no string `type` field"),
            Self::UnknownType(kind) => write!(f, "unrecognized frame type `{kind}`"),
            Self::Invalid { kind, detail } => write!(f, "invalid `{kind}` frame: {detail}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse one inbound text frame.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    ClientFrame::from_value(value)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
