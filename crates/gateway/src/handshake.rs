// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection authentication state machine.
//!
//! ```text
//! connecting -> unauthenticated -> authenticated -> closed
//!                      |
//!                      +-> rejected -> closed
//! ```

use pinksync_protocol::ServerFrame;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::identity::{TokenVerifier, VerifyError};
use crate::registry::{Connection, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    Unauthenticated,
    Authenticated { identity: String },
    Rejected,
    Closed,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated { .. } => "authenticated",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }
}

/// Authentication gate owned by one connection task.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self { state: HandshakeState::Connecting }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Transport is open; start waiting for `authenticate`.
    pub fn begin(&mut self) {
        if self.state == HandshakeState::Connecting {
            self.state = HandshakeState::Unauthenticated;
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.state {
            HandshakeState::Authenticated { identity } => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }

    /// Rejected or closed: no further frames are processed.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, HandshakeState::Rejected | HandshakeState::Closed)
    }

    /// The bound identity, or the error to report for a functional frame.
    pub fn require_authenticated(&self) -> Result<&str, GatewayError> {
        self.identity().ok_or(GatewayError::NotAuthenticated)
    }

    /// Enter `closed`. Returns the identity that was bound, if any.
    pub fn close(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, HandshakeState::Closed) {
            HandshakeState::Authenticated { identity } => Some(identity),
            _ => None,
        }
    }

    /// Resolve `token` and bind the identity to `conn`.
    ///
    /// Replies on the connection itself: `authenticated` on success; on
    /// failure `auth_error` followed by a close. The caller only needs the
    /// result for logging and follow-up work.
    pub async fn authenticate(
        &mut self,
        conn: &Connection,
        registry: &Registry,
        verifier: &dyn TokenVerifier,
        token: Option<&str>,
    ) -> Result<String, GatewayError> {
        match self.state {
            HandshakeState::Unauthenticated => {}
            HandshakeState::Authenticated { .. } => return Err(GatewayError::AlreadyAuthenticated),
            _ => return Err(GatewayError::NotAuthenticated),
        }

        let outcome = match token.filter(|t| !t.is_empty()) {
            Some(token) => verifier.verify(token).await,
            None => Err(VerifyError::MissingToken),
        };

        match outcome {
            Ok(identity) => {
                registry.register_identity(conn, &identity);
                self.state = HandshakeState::Authenticated { identity: identity.clone() };
                conn.send(&ServerFrame::Authenticated { user_id: identity.clone() });
                info!(conn = conn.id(), user = %identity, verifier = verifier.name(), "authenticated");
                Ok(identity)
            }
            Err(e) => {
                warn!(conn = conn.id(), code = e.as_str(), err = ?e, "authentication failed");
                let err = GatewayError::from(e);
                if let Some(frame) = err.to_frame() {
                    conn.send(&frame);
                }
                conn.close();
                self.state = HandshakeState::Rejected;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
