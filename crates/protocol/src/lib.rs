// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PinkSync wire protocol.
//!
//! Every frame is a single JSON object tagged by a mandatory `type` field.
//! This crate is the canonical source for the frame shapes used by both the
//! gateway and the client connection manager, so the two sides cannot drift.

mod frame;
mod reason;

pub use frame::{parse_client_frame, ClientFrame, FrameError, ServerFrame};
pub use reason::ErrorReason;

/// Return the current UTC time as an ISO 8601 string with millisecond
/// precision (e.g. "2026-02-14T01:23:45.678Z").
pub fn iso8601_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
