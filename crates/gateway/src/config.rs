// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Configuration for the PinkSync gateway.
#[derive(Debug, Clone, Parser)]
#[command(name = "pinksync-gateway", version, about = "PinkSync real-time sync gateway")]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PINKSYNC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8004, env = "PINKSYNC_PORT")]
    pub port: u16,

    /// Identity service verify endpoint. When unset, tokens are decoded
    /// without signature verification.
    #[arg(long, env = "PINKSYNC_VERIFY_URL")]
    pub verify_url: Option<String>,

    /// Endpoint that receives accessibility preference updates.
    #[arg(long, env = "PINKSYNC_PREFERENCES_URL")]
    pub preferences_url: Option<String>,

    /// Trust-score event log endpoint.
    #[arg(long, env = "PINKSYNC_EVENT_LOG_URL")]
    pub event_log_url: Option<String>,

    /// Timeout for calls to external collaborators, in milliseconds.
    #[arg(long, default_value_t = 10000, env = "PINKSYNC_COLLABORATOR_TIMEOUT_MS")]
    pub collaborator_timeout_ms: u64,

    /// Comma-separated CORS origins. Empty allows any origin.
    #[arg(long, value_delimiter = ',', env = "PINKSYNC_ALLOWED_ORIGINS")]
    pub allowed_origins: Vec<String>,

    /// Log format (json or text).
    #[arg(long, env = "PINKSYNC_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PINKSYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text, got {:?}", self.log_format);
        }
        for (flag, url) in [
            ("--verify-url", &self.verify_url),
            ("--preferences-url", &self.preferences_url),
            ("--event-log-url", &self.event_log_url),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("{flag} must be an http(s) URL, got {url:?}");
                }
            }
        }
        if self.collaborator_timeout_ms == 0 {
            anyhow::bail!("--collaborator-timeout-ms must be positive");
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Defaults suitable for in-process tests: ephemeral port, no
    /// collaborators.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            verify_url: None,
            preferences_url: None,
            event_log_url: None,
            collaborator_timeout_ms: 2000,
            allowed_origins: vec![],
            log_format: "text".to_owned(),
            log_level: "debug".to_owned(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
