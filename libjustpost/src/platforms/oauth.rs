//! Pieces shared by the OAuth connectors: pending-state bookkeeping and
//! authorization URL construction.

use std::time::Duration;

use reqwest::Url;

use crate::error::{ConfigError, PlatformError, Result, StoreError};
use crate::pkce::{decode_state_token, generate_state_token};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{PendingAuthState, PlatformId};

/// Create, persist and return pending state for a new login.
pub(crate) async fn begin_pending(
    store: &SecretStore,
    prefix: StorePrefix,
    user_id: &str,
    platform: PlatformId,
    code_verifier: Option<String>,
    ttl: Duration,
) -> Result<PendingAuthState> {
    let pending = PendingAuthState {
        state_token: generate_state_token(platform),
        code_verifier,
    };

    if !store.set(prefix, user_id, &pending, Some(ttl)).await {
        return Err(StoreError::Unavailable(format!(
            "could not save {} login state",
            platform.display_name()
        ))
        .into());
    }

    tracing::debug!(platform = %platform, "Stored pending auth state");
    Ok(pending)
}

/// Consume the pending state for `user_id` and check it against `state`.
///
/// The pending entry is removed whether or not the check passes, so a given
/// state can complete at most one callback.
pub(crate) async fn consume_pending(
    store: &SecretStore,
    prefix: StorePrefix,
    user_id: &str,
    platform: PlatformId,
    state: &str,
) -> std::result::Result<PendingAuthState, PlatformError> {
    let Some(pending) = store.take::<PendingAuthState>(prefix, user_id).await else {
        tracing::warn!(platform = %platform, "No pending auth state (expired, consumed or never started)");
        return Err(PlatformError::StateMismatch(
            "no login in progress".to_string(),
        ));
    };

    if pending.state_token != state {
        tracing::warn!(platform = %platform, "State token mismatch on callback");
        return Err(PlatformError::StateMismatch("state does not match".to_string()));
    }

    match decode_state_token(state) {
        Ok(payload) if payload.platform == platform => Ok(pending),
        _ => {
            tracing::warn!(platform = %platform, "State token issued for another platform");
            Err(PlatformError::StateMismatch("state does not match".to_string()))
        }
    }
}

/// Append query parameters to an authorization endpoint.
pub(crate) fn authorize_url(base: &str, params: &[(&str, &str)]) -> Result<String> {
    let url = Url::parse_with_params(base, params)
        .map_err(|_| ConfigError::InvalidValue(format!("authorize endpoint '{}'", base)))?;
    Ok(url.into())
}
