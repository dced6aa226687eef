// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::identity::{HttpTokenVerifier, TokenVerifier, UnverifiedDecoder};
use crate::registry::Registry;
use crate::router::MessageRouter;
use crate::store::{
    EventLog, HttpEventLog, HttpPreferenceStore, LoggingPreferenceStore, NoopEventLog,
    PreferenceStore,
};

/// Shared gateway state.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub router: MessageRouter,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl GatewayState {
    /// Build state with collaborators selected from `config`.
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let timeout = config.collaborator_timeout();

        let verifier: Arc<dyn TokenVerifier> = match config.verify_url {
            Some(ref url) => Arc::new(HttpTokenVerifier::new(url.clone(), timeout)?),
            None => {
                warn!("no --verify-url configured; token signatures are NOT checked");
                Arc::new(UnverifiedDecoder)
            }
        };
        let preferences: Arc<dyn PreferenceStore> = match config.preferences_url {
            Some(ref url) => Arc::new(HttpPreferenceStore::new(url.clone(), timeout)?),
            None => Arc::new(LoggingPreferenceStore),
        };
        let events: Arc<dyn EventLog> = match config.event_log_url {
            Some(ref url) => Arc::new(HttpEventLog::new(url.clone(), timeout)?),
            None => Arc::new(NoopEventLog),
        };

        Ok(Self::with_collaborators(config, shutdown, verifier, preferences, events))
    }

    pub fn with_collaborators(
        config: GatewayConfig,
        shutdown: CancellationToken,
        verifier: Arc<dyn TokenVerifier>,
        preferences: Arc<dyn PreferenceStore>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            config,
            router: MessageRouter::new(registry, verifier, preferences, events),
            shutdown,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }
}
