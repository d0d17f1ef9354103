//! LinkedIn connector
//!
//! Authorization-code OAuth without PKCE. The member's person URN comes from
//! the `sub` claim of the `id_token` returned with the access token. LinkedIn
//! issues no refresh token to this integration, so a token that gets close to
//! expiry is dropped and the user has to log in again.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::{LinkedInConfig, LinkedInEndpoints};
use crate::error::{PlatformError, Result};
use crate::platforms::{http, oauth, Connector, LoginStart};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{
    expires_at_from_now, is_outside_window, LinkedInTokens, PlatformId, PostOutcome,
    StoredCredential,
};

const SCOPES: &str = "openid profile email w_member_social";
const PENDING_TTL: Duration = Duration::from_secs(300);
const SAFETY_WINDOW: Duration = Duration::from_secs(5 * 60);
const RESTLI_PROTOCOL_VERSION: &str = "2.0.0";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    id_token: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
}

#[derive(Deserialize)]
struct UgcPostResponse {
    id: Option<String>,
}

/// Read the `sub` claim from an OpenID Connect id_token without verifying its signature.
///
/// The token comes straight from LinkedIn's token endpoint over TLS.
pub fn person_urn_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&decoded).ok()?;

    if claims.sub.is_empty() {
        return None;
    }
    Some(format!("urn:li:person:{}", claims.sub))
}

pub struct LinkedInConnector {
    client_id: String,
    client_secret: SecretString,
    callback_uri: String,
    endpoints: LinkedInEndpoints,
    client: reqwest::Client,
    store: SecretStore,
}

impl LinkedInConnector {
    pub fn new(config: &LinkedInConfig, client: reqwest::Client, store: SecretStore) -> Self {
        Self {
            client_id: config.client.client_id.clone(),
            client_secret: config.client.client_secret.clone(),
            callback_uri: config.client.callback_uri.clone(),
            endpoints: config.endpoints.clone(),
            client,
            store,
        }
    }

    async fn load_tokens(&self, user_id: &str) -> Option<LinkedInTokens> {
        match self
            .store
            .get::<StoredCredential>(StorePrefix::LinkedInTokens, user_id)
            .await?
        {
            StoredCredential::LinkedIn(tokens) => Some(tokens),
            other => {
                tracing::warn!(found = %other.platform(), "Unexpected credential type under linkedin prefix");
                None
            }
        }
    }

    async fn exchange_code(&self, code: &str) -> std::result::Result<LinkedInTokens, PlatformError> {
        let response = self
            .client
            .post(&self.endpoints.token)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("redirect_uri", self.callback_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::LinkedIn, "code exchange", e))?;

        if !response.status().is_success() {
            return Err(
                http::error_from_response(PlatformId::LinkedIn, "code exchange", response).await,
            );
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| http::map_request_error(PlatformId::LinkedIn, "code exchange", e))?;

        let person_urn = token
            .id_token
            .as_deref()
            .and_then(person_urn_from_id_token)
            .ok_or_else(|| {
                PlatformError::Authentication(
                    "LinkedIn did not return a usable identity token".to_string(),
                )
            })?;

        Ok(LinkedInTokens {
            access_token: token.access_token,
            person_urn,
            expires_at: expires_at_from_now(token.expires_in),
        })
    }

    async fn create_post(
        &self,
        tokens: &LinkedInTokens,
        text: &str,
    ) -> std::result::Result<String, PlatformError> {
        let body = json!({
            "author": tokens.person_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE",
                },
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC",
            },
        });

        let response = self
            .client
            .post(format!("{}/ugcPosts", self.endpoints.api))
            .bearer_auth(&tokens.access_token)
            .header("X-Restli-Protocol-Version", RESTLI_PROTOCOL_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::LinkedIn, "post", e))?;

        if response.status() != StatusCode::CREATED {
            return Err(http::error_from_response(PlatformId::LinkedIn, "post", response).await);
        }

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let post_id = match header_id {
            Some(id) => id,
            None => response
                .json::<UgcPostResponse>()
                .await
                .ok()
                .and_then(|r| r.id)
                .ok_or_else(|| {
                    PlatformError::Posting("LinkedIn did not return a post id".to_string())
                })?,
        };

        tracing::debug!(id = %post_id, "Posted to LinkedIn");
        Ok(post_id)
    }

    async fn revoke(&self, token: &str) -> std::result::Result<(), PlatformError> {
        let response = self
            .client
            .post(&self.endpoints.revoke)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("token", token),
            ])
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::LinkedIn, "revoke", e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::LinkedIn, "revoke", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for LinkedInConnector {
    fn platform(&self) -> PlatformId {
        PlatformId::LinkedIn
    }

    async fn start_login(&self, user_id: &str) -> Result<LoginStart> {
        let pending = oauth::begin_pending(
            &self.store,
            StorePrefix::LinkedInCodes,
            user_id,
            PlatformId::LinkedIn,
            None,
            PENDING_TTL,
        )
        .await?;

        let url = oauth::authorize_url(
            &self.endpoints.authorize,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_uri.as_str()),
                ("scope", SCOPES),
                ("state", pending.state_token.as_str()),
            ],
        )?;

        Ok(LoginStart::AuthUrl(url))
    }

    async fn complete_callback(&self, user_id: &str, code: &str, state: &str) -> bool {
        if oauth::consume_pending(
            &self.store,
            StorePrefix::LinkedInCodes,
            user_id,
            PlatformId::LinkedIn,
            state,
        )
        .await
        .is_err()
        {
            return false;
        }

        match self.exchange_code(code).await {
            Ok(tokens) => {
                self.store
                    .set(
                        StorePrefix::LinkedInTokens,
                        user_id,
                        &StoredCredential::LinkedIn(tokens),
                        None,
                    )
                    .await
            }
            Err(e) => {
                tracing::info!(error = %e, "LinkedIn code exchange failed");
                false
            }
        }
    }

    async fn cancel_login(&self, user_id: &str) -> bool {
        self.store.delete(StorePrefix::LinkedInCodes, user_id).await
    }

    async fn verify_and_refresh(&self, user_id: &str) -> bool {
        let Some(tokens) = self.load_tokens(user_id).await else {
            return false;
        };

        if is_outside_window(tokens.expires_at, SAFETY_WINDOW) {
            return true;
        }

        tracing::info!("LinkedIn token expiring and cannot be refreshed, forgetting it");
        self.store.delete(StorePrefix::LinkedInTokens, user_id).await;
        false
    }

    async fn publish(&self, user_id: &str, text: &str) -> PostOutcome {
        if let Err(e) = self.validate_content(text) {
            return PostOutcome::failure(PlatformId::LinkedIn, e.to_string());
        }

        if !self.verify_and_refresh(user_id).await {
            return PostOutcome::failure(
                PlatformId::LinkedIn,
                PlatformError::NotConnected(PlatformId::LinkedIn).to_string(),
            );
        }

        let Some(tokens) = self.load_tokens(user_id).await else {
            return PostOutcome::failure(
                PlatformId::LinkedIn,
                PlatformError::NotConnected(PlatformId::LinkedIn).to_string(),
            );
        };

        match self.create_post(&tokens, text).await {
            Ok(id) => PostOutcome::success(PlatformId::LinkedIn, id),
            Err(e) => PostOutcome::failure(PlatformId::LinkedIn, e.to_string()),
        }
    }

    async fn disconnect(&self, user_id: &str) -> bool {
        if let Some(tokens) = self.load_tokens(user_id).await {
            if let Err(e) = self.revoke(&tokens.access_token).await {
                tracing::warn!(error = %e, "LinkedIn token revocation failed");
            }
        }

        self.store.delete(StorePrefix::LinkedInCodes, user_id).await;
        self.store.delete(StorePrefix::LinkedInTokens, user_id).await
    }
}
