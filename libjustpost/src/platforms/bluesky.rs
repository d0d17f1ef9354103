//! BlueSky connector
//!
//! BlueSky has no OAuth flow here: the user supplies a handle and an app
//! password, and a fresh session is created from them for every operation.
//! "Refreshing" therefore means creating a session again from the stored
//! credentials.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::json;

use crate::config::BlueskyConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{http, Connector, LoginStart};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{BlueskyCredentials, PlatformId, PostOutcome, StoredCredential};

const POST_COLLECTION: &str = "app.bsky.feed.post";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

pub struct BlueskyConnector {
    service: String,
    client: reqwest::Client,
    store: SecretStore,
}

impl BlueskyConnector {
    pub fn new(config: &BlueskyConfig, client: reqwest::Client, store: SecretStore) -> Self {
        Self {
            service: config.service.trim_end_matches('/').to_string(),
            client,
            store,
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/{}", self.service, method)
    }

    async fn load_credentials(&self, user_id: &str) -> Option<BlueskyCredentials> {
        match self
            .store
            .get::<StoredCredential>(StorePrefix::BlueskyCredentials, user_id)
            .await?
        {
            StoredCredential::Bluesky(credentials) => Some(credentials),
            other => {
                tracing::warn!(found = %other.platform(), "Unexpected credential type under bluesky prefix");
                None
            }
        }
    }

    async fn create_session(
        &self,
        credentials: &BlueskyCredentials,
    ) -> std::result::Result<Session, PlatformError> {
        tracing::debug!(identifier = %credentials.identifier, "Creating Bluesky session");

        let response = self
            .client
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": credentials.identifier,
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Bluesky, "authentication", e))?;

        if !response.status().is_success() {
            return Err(
                http::error_from_response(PlatformId::Bluesky, "authentication", response).await,
            );
        }

        response
            .json::<Session>()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Bluesky, "authentication", e))
    }

    async fn create_post(
        &self,
        session: &Session,
        text: &str,
    ) -> std::result::Result<String, PlatformError> {
        let created_at = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let response = self
            .client
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": {
                    "$type": POST_COLLECTION,
                    "text": text,
                    "createdAt": created_at,
                },
            }))
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Bluesky, "post", e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::Bluesky, "post", response).await);
        }

        let created = response
            .json::<CreateRecordResponse>()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Bluesky, "post", e))?;

        tracing::debug!(uri = %created.uri, "Posted to Bluesky");
        Ok(created.uri)
    }

    async fn forget_credentials(&self, user_id: &str) -> bool {
        self.store
            .delete(StorePrefix::BlueskyCredentials, user_id)
            .await
    }
}

#[async_trait]
impl Connector for BlueskyConnector {
    fn platform(&self) -> PlatformId {
        PlatformId::Bluesky
    }

    async fn start_login(&self, _user_id: &str) -> Result<LoginStart> {
        Ok(LoginStart::CredentialsRequired)
    }

    async fn submit_credentials(&self, user_id: &str, credentials: &BlueskyCredentials) -> bool {
        if !credentials.is_complete() {
            tracing::debug!("Rejecting incomplete Bluesky credentials");
            return false;
        }

        if let Err(e) = self.create_session(credentials).await {
            tracing::info!(error = %e, "Bluesky login failed");
            return false;
        }

        self.store
            .set(
                StorePrefix::BlueskyCredentials,
                user_id,
                &StoredCredential::Bluesky(credentials.clone()),
                None,
            )
            .await
    }

    async fn complete_callback(&self, _user_id: &str, _code: &str, _state: &str) -> bool {
        tracing::warn!("Bluesky does not use OAuth callbacks");
        false
    }

    async fn verify_and_refresh(&self, user_id: &str) -> bool {
        let Some(credentials) = self.load_credentials(user_id).await else {
            return false;
        };

        match self.create_session(&credentials).await {
            Ok(_) => true,
            Err(e) if e.is_authentication() => {
                tracing::info!(error = %e, "Stored Bluesky credentials rejected, forgetting them");
                self.forget_credentials(user_id).await;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not verify Bluesky credentials");
                false
            }
        }
    }

    async fn publish(&self, user_id: &str, text: &str) -> PostOutcome {
        if let Err(e) = self.validate_content(text) {
            return PostOutcome::failure(PlatformId::Bluesky, e.to_string());
        }

        let Some(credentials) = self.load_credentials(user_id).await else {
            return PostOutcome::failure(
                PlatformId::Bluesky,
                PlatformError::NotConnected(PlatformId::Bluesky).to_string(),
            );
        };

        let result = match self.create_session(&credentials).await {
            Ok(session) => self.create_post(&session, text).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(uri) => PostOutcome::success(PlatformId::Bluesky, uri),
            Err(e) => {
                if e.is_authentication() {
                    tracing::info!(error = %e, "Bluesky rejected stored credentials while posting, forgetting them");
                    self.forget_credentials(user_id).await;
                }
                PostOutcome::failure(PlatformId::Bluesky, e.to_string())
            }
        }
    }

    async fn disconnect(&self, user_id: &str) -> bool {
        self.forget_credentials(user_id).await
    }
}
