// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token -> identity resolution.
//!
//! The gateway never issues credentials. It asks a [`TokenVerifier`] to turn
//! the handshake token into a subject identifier.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::store::http_client;

/// Why a token did not resolve to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// No token, or an empty one.
    MissingToken,
    /// Not a decodable `header.payload.signature` token.
    Malformed(String),
    /// Decoded, but carries no usable subject.
    MissingSubject,
    /// The token's `exp` is in the past.
    Expired,
    /// The identity service said no.
    Rejected,
    /// The identity service could not be reached or answered nonsense.
    Unavailable(String),
}

impl VerifyError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::Malformed(_) => "MALFORMED",
            Self::MissingSubject => "MISSING_SUBJECT",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => f.write_str("token required"),
            Self::Malformed(_) => f.write_str("invalid token"),
            Self::MissingSubject => f.write_str("token has no subject"),
            Self::Expired => f.write_str("token expired"),
            Self::Rejected => f.write_str("token rejected"),
            Self::Unavailable(_) => f.write_str("identity service unavailable"),
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<VerifyError> for GatewayError {
    fn from(err: VerifyError) -> Self {
        Self::Authentication(err.to_string())
    }
}

/// Resolves a handshake token to a subject identifier.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, VerifyError>>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Unverified decode
// ---------------------------------------------------------------------------

/// Reads `sub` from a JWT-shaped token without checking its signature.
///
/// Only suitable for development or behind a trusted proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnverifiedDecoder;

impl UnverifiedDecoder {
    pub fn decode(token: &str) -> Result<String, VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::MissingToken);
        }
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| VerifyError::Malformed("expected header.payload.signature".to_owned()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| VerifyError::Malformed(format!("payload: {e}")))?;
        let claims: Value = serde_json::from_slice(&bytes)
            .map_err(|e| VerifyError::Malformed(format!("claims: {e}")))?;
        if !claims.is_object() {
            return Err(VerifyError::Malformed("claims are not an object".to_owned()));
        }

        if let Some(exp) = claims.get("exp").and_then(Value::as_u64) {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
            if exp <= now {
                return Err(VerifyError::Expired);
            }
        }

        match claims.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => Ok(sub.to_owned()),
            _ => Err(VerifyError::MissingSubject),
        }
    }
}

impl TokenVerifier for UnverifiedDecoder {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, VerifyError>> {
        Box::pin(async move { Self::decode(token) })
    }

    fn name(&self) -> &'static str {
        "unverified-decode"
    }
}

// ---------------------------------------------------------------------------
// Identity service
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    user: Option<VerifiedUser>,
}

#[derive(Debug, Deserialize)]
struct VerifiedUser {
    #[serde(default)]
    id: Option<String>,
}

/// Asks the identity service's verify endpoint.
pub struct HttpTokenVerifier {
    url: String,
    client: Client,
}

impl HttpTokenVerifier {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { url, client: http_client(timeout)? })
    }

    async fn call(&self, token: &str) -> Result<String, VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::MissingToken);
        }
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(VerifyError::Rejected);
        }
        if !status.is_success() {
            return Err(VerifyError::Unavailable(format!("status {status}")));
        }

        let body: VerifyResponse =
            resp.json().await.map_err(|e| VerifyError::Unavailable(e.to_string()))?;
        if !body.valid {
            return Err(VerifyError::Rejected);
        }
        match body.user.and_then(|u| u.id) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(VerifyError::MissingSubject),
        }
    }
}

impl TokenVerifier for HttpTokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<String, VerifyError>> {
        Box::pin(self.call(token))
    }

    fn name(&self) -> &'static str {
        "identity-service"
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
