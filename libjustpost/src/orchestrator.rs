//! Per-user connection lifecycle
//!
//! A [`ConnectionOrchestrator`] is built for one user for the duration of a
//! request or session. It combines two sources:
//!
//! - the durable mirror of which platforms the user added and selected,
//!   kept in the secret store under `platform_prefs`
//! - live connection status, which only ever comes from the connectors
//!
//! A platform counts as added when it was recorded as added or is connected,
//! and as selected only when it was recorded as selected *and* is connected.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PlatformError, Result, StateTokenError};
use crate::pkce::decode_state_token;
use crate::platforms::{Connectors, LoginStart};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{BlueskyCredentials, PlatformConnectionState, PlatformId};

/// What the user added and selected, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPrefs {
    #[serde(default)]
    pub added: BTreeSet<PlatformId>,
    #[serde(default)]
    pub selected: BTreeSet<PlatformId>,
}

/// Result of routing an OAuth callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackResult {
    pub platform: PlatformId,
    pub connected: bool,
}

pub struct ConnectionOrchestrator {
    user_id: String,
    connectors: Connectors,
    store: SecretStore,
    prefs: PlatformPrefs,
    connected: BTreeMap<PlatformId, bool>,
}

impl ConnectionOrchestrator {
    /// Orchestrator with no recorded preferences and nothing connected.
    pub fn new(user_id: impl Into<String>, connectors: Connectors, store: SecretStore) -> Self {
        Self {
            user_id: user_id.into(),
            connectors,
            store,
            prefs: PlatformPrefs::default(),
            connected: BTreeMap::new(),
        }
    }

    /// Read the persisted preferences without any live checks.
    ///
    /// Every platform starts out disconnected; call [`Self::refresh_status`]
    /// for the platforms that matter.
    pub async fn restore(
        user_id: impl Into<String>,
        connectors: Connectors,
        store: SecretStore,
    ) -> Self {
        let mut orchestrator = Self::new(user_id, connectors, store);
        if let Some(prefs) = orchestrator
            .store
            .get::<PlatformPrefs>(StorePrefix::PlatformPrefs, &orchestrator.user_id)
            .await
        {
            orchestrator.prefs = prefs;
        }
        orchestrator
    }

    /// Restore preferences, then verify every added or selected platform
    /// concurrently.
    ///
    /// Platforms found disconnected lose their recorded selection; platforms
    /// found connected are recorded as added.
    pub async fn load(user_id: impl Into<String>, connectors: Connectors, store: SecretStore) -> Self {
        let mut orchestrator = Self::restore(user_id, connectors, store).await;

        let recorded: Vec<PlatformId> = orchestrator
            .prefs
            .added
            .union(&orchestrator.prefs.selected)
            .copied()
            .filter(|id| orchestrator.connectors.is_configured(*id))
            .collect();

        let checks = recorded.iter().map(|&id| {
            let connectors = &orchestrator.connectors;
            let user_id = orchestrator.user_id.as_str();
            async move {
                let live = match connectors.get(id) {
                    Ok(connector) => connector.verify_and_refresh(user_id).await,
                    Err(_) => false,
                };
                (id, live)
            }
        });
        let results = join_all(checks).await;

        let mut changed = false;
        for (id, live) in results {
            orchestrator.connected.insert(id, live);
            changed |= orchestrator.fold_live_status(id, live);
        }

        if changed {
            orchestrator.persist().await;
        }

        debug!(user = %orchestrator.user_id, platforms = recorded.len(), "Loaded connection states");
        orchestrator
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn prefs(&self) -> &PlatformPrefs {
        &self.prefs
    }

    pub fn is_connected(&self, id: PlatformId) -> bool {
        self.connected.get(&id).copied().unwrap_or(false)
    }

    pub fn state(&self, id: PlatformId) -> PlatformConnectionState {
        PlatformConnectionState::new(
            id,
            self.prefs.added.contains(&id),
            self.is_connected(id),
            self.prefs.selected.contains(&id),
        )
    }

    /// State of every configured platform.
    pub fn states(&self) -> Vec<PlatformConnectionState> {
        self.connectors
            .platforms()
            .into_iter()
            .map(|id| self.state(id))
            .collect()
    }

    /// Platforms eligible for fan-out right now, as a snapshot.
    pub fn selected(&self) -> Vec<PlatformConnectionState> {
        self.states()
            .into_iter()
            .filter(|s| s.is_publishable())
            .collect()
    }

    /// not-added → added-disconnected
    ///
    /// # Errors
    ///
    /// `ConfigError::PlatformNotConfigured` for a platform without a connector.
    pub async fn add_platform(&mut self, id: PlatformId) -> Result<PlatformConnectionState> {
        self.connectors.get(id)?;
        if self.prefs.added.insert(id) {
            info!(platform = %id, "Platform added");
            self.persist().await;
        }
        Ok(self.state(id))
    }

    /// Begin a user-triggered connect from any state.
    ///
    /// The platform is recorded as added. OAuth platforms return the
    /// authorization URL; credential platforms ask for credentials.
    pub async fn begin_connect(&mut self, id: PlatformId) -> Result<LoginStart> {
        let connector = self.connectors.get(id)?;
        let start = connector.start_login(&self.user_id).await?;
        if self.prefs.added.insert(id) {
            self.persist().await;
        }
        Ok(start)
    }

    /// Submit direct credentials; success lands in connected-selected.
    pub async fn submit_credentials(
        &mut self,
        id: PlatformId,
        credentials: &BlueskyCredentials,
    ) -> Result<bool> {
        let connector = self.connectors.get(id)?;
        let connected = connector.submit_credentials(&self.user_id, credentials).await;
        if connected {
            self.mark_connected(id).await;
        }
        Ok(connected)
    }

    /// Route an OAuth callback by the platform inside `state`.
    ///
    /// A provider-reported error still consumes the pending login. The
    /// result names the platform so callers can report a specific failure.
    ///
    /// # Errors
    ///
    /// Returns the decode error when `state` is not one of ours; nothing is
    /// consumed in that case because the platform cannot be known.
    pub async fn complete_callback(
        &mut self,
        code: Option<&str>,
        state: &str,
        provider_error: Option<&str>,
    ) -> std::result::Result<CallbackResult, StateTokenError> {
        let platform = decode_state_token(state)?.platform;

        let connector = match self.connectors.get(platform) {
            Ok(connector) => connector,
            Err(e) => {
                warn!(platform = %platform, error = %e, "Callback for unconfigured platform");
                return Ok(CallbackResult {
                    platform,
                    connected: false,
                });
            }
        };

        if let Some(error) = provider_error {
            warn!(platform = %platform, provider_error = %error, "Provider rejected authorization");
            connector.cancel_login(&self.user_id).await;
            return Ok(CallbackResult {
                platform,
                connected: false,
            });
        }

        let connected = match code.filter(|c| !c.is_empty()) {
            Some(code) => connector.complete_callback(&self.user_id, code, state).await,
            None => {
                warn!(platform = %platform, "Callback without authorization code");
                connector.cancel_login(&self.user_id).await;
                false
            }
        };

        if connected {
            self.mark_connected(platform).await;
        } else {
            self.connected.insert(platform, false);
        }

        Ok(CallbackResult {
            platform,
            connected,
        })
    }

    /// connected-unselected ⇄ connected-selected
    ///
    /// # Errors
    ///
    /// `PlatformError::NotConnected` when the platform is not connected.
    pub async fn toggle_select(
        &mut self,
        id: PlatformId,
    ) -> std::result::Result<PlatformConnectionState, PlatformError> {
        if !self.is_connected(id) {
            return Err(PlatformError::NotConnected(id));
        }

        self.prefs.added.insert(id);
        if !self.prefs.selected.remove(&id) {
            self.prefs.selected.insert(id);
        }
        self.persist().await;
        Ok(self.state(id))
    }

    /// Any connected state → added-disconnected.
    ///
    /// Local state ends up disconnected whatever the connector reports; the
    /// returned flag is the connector's.
    pub async fn disconnect(&mut self, id: PlatformId) -> Result<bool> {
        let connector = self.connectors.get(id)?;
        let removed = connector.disconnect(&self.user_id).await;

        self.connected.insert(id, false);
        self.prefs.added.insert(id);
        self.prefs.selected.remove(&id);
        self.persist().await;

        info!(platform = %id, remote_and_local = removed, "Platform disconnected");
        Ok(removed)
    }

    /// Ask the connector for live status and fold it into the state.
    pub async fn refresh_status(&mut self, id: PlatformId) -> Result<bool> {
        let connector = self.connectors.get(id)?;
        let live = connector.verify_and_refresh(&self.user_id).await;
        self.connected.insert(id, live);

        if self.fold_live_status(id, live) {
            self.persist().await;
        }
        Ok(live)
    }

    /// Keep the recorded preferences in line with a live check. Returns
    /// whether they changed.
    fn fold_live_status(&mut self, id: PlatformId, live: bool) -> bool {
        if live {
            self.prefs.added.insert(id)
        } else {
            self.prefs.selected.remove(&id)
        }
    }

    async fn mark_connected(&mut self, id: PlatformId) {
        self.connected.insert(id, true);
        self.prefs.added.insert(id);
        self.prefs.selected.insert(id);
        info!(platform = %id, "Platform connected");
        self.persist().await;
    }

    async fn persist(&self) {
        if !self
            .store
            .set(StorePrefix::PlatformPrefs, &self.user_id, &self.prefs, None)
            .await
        {
            warn!(user = %self.user_id, "Could not persist platform preferences");
        }
    }
}
