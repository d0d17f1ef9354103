//! Route handlers

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use libjustpost::types::{BlueskyCredentials, ComposeBuffer, FailedPost, PlatformId, PostOutcome};
use libjustpost::pkce::decode_state_token;
use libjustpost::{ConnectionOrchestrator, LoginStart, PlatformConnectionState};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::extract::{AuthenticatedUser, PlatformParam};
use crate::AppState;

/// Login failure code used when the platform cannot be recovered from `state`.
pub const GENERIC_LOGIN_FAILED: &str = "login_failed";

async fn restore(state: &AppState, user: &str) -> ConnectionOrchestrator {
    ConnectionOrchestrator::restore(user, state.connectors.clone(), state.store.clone()).await
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub credentials_required: bool,
}

impl From<LoginStart> for LoginResponse {
    fn from(start: LoginStart) -> Self {
        match start {
            LoginStart::AuthUrl(url) => Self {
                auth_url: Some(url),
                credentials_required: false,
            },
            LoginStart::CredentialsRequired => Self {
                auth_url: None,
                credentials_required: true,
            },
        }
    }
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_connected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub succeeded: Vec<PlatformId>,
    pub failed: Vec<FailedPost>,
    /// Whether the composed text was cleared (every target succeeded)
    pub cleared: bool,
    pub outcomes: Vec<PostOutcome>,
}

/// `GET /api/platforms`: every configured platform with live status
pub async fn list_platforms(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Json<Vec<PlatformConnectionState>> {
    let orchestrator =
        ConnectionOrchestrator::load(user, state.connectors.clone(), state.store.clone()).await;
    Json(orchestrator.states())
}

/// `POST /api/platforms/:platform/add`
pub async fn add_platform(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
) -> Result<Json<PlatformConnectionState>, ApiError> {
    let mut orchestrator = restore(&state, &user).await;
    Ok(Json(orchestrator.add_platform(platform).await?))
}

/// `POST /api/platforms/:platform/select`
///
/// Status is checked live first so a platform whose tokens died since the
/// last page load cannot be selected.
pub async fn toggle_select(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
) -> Result<Json<PlatformConnectionState>, ApiError> {
    let mut orchestrator = restore(&state, &user).await;
    orchestrator.refresh_status(platform).await?;
    Ok(Json(orchestrator.toggle_select(platform).await?))
}

/// `POST /api/:platform/login`
pub async fn begin_login(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut orchestrator = restore(&state, &user).await;
    let start = orchestrator.begin_connect(platform).await?;
    Ok(Json(start.into()))
}

/// `POST /api/bluesky/credentials`; OAuth platforms have no such route
pub async fn submit_credentials(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if platform.uses_oauth() {
        return Err(ApiError::UnknownPlatform(format!("{}/credentials", platform)));
    }

    let credentials = BlueskyCredentials::new(body.identifier, body.password);
    if !credentials.is_complete() {
        return Err(ApiError::BadRequest(
            "Identifier and app password are required".to_string(),
        ));
    }

    let mut orchestrator = restore(&state, &user).await;
    if !orchestrator
        .submit_credentials(platform, &credentials)
        .await?
    {
        return Err(ApiError::Internal(format!(
            "{} login failed",
            platform.display_name()
        )));
    }

    Ok(Json(SuccessResponse {
        success: true,
        error: None,
    }))
}

/// `GET /api/callback`: shared OAuth redirect target for every platform
///
/// Always answers with a redirect back to the app, even without a user
/// identity; failures carry `?error=<platform>_login_failed`.
pub async fn oauth_callback(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let Some(state_token) = params.state.as_deref().filter(|s| !s.is_empty()) else {
        warn!("OAuth callback without state");
        return app_redirect(&state.app_base_url, Some(GENERIC_LOGIN_FAILED));
    };

    let Some(AuthenticatedUser(user)) = user else {
        warn!("OAuth callback without user identity");
        let code = match decode_state_token(state_token) {
            Ok(decoded) => format!("{}_login_failed", decoded.platform),
            Err(_) => GENERIC_LOGIN_FAILED.to_string(),
        };
        return app_redirect(&state.app_base_url, Some(&code));
    };

    let mut orchestrator = restore(&state, &user).await;
    match orchestrator
        .complete_callback(params.code.as_deref(), state_token, params.error.as_deref())
        .await
    {
        Ok(result) if result.connected => {
            info!(platform = %result.platform, "OAuth login completed");
            app_redirect(&state.app_base_url, None)
        }
        Ok(result) => {
            let code = format!("{}_login_failed", result.platform);
            app_redirect(&state.app_base_url, Some(&code))
        }
        Err(e) => {
            warn!(error = %e, "OAuth callback with unrecognised state");
            app_redirect(&state.app_base_url, Some(GENERIC_LOGIN_FAILED))
        }
    }
}

fn app_redirect(base: &str, error: Option<&str>) -> Redirect {
    match error {
        None => Redirect::to(base),
        Some(code) => {
            let separator = if base.contains('?') { '&' } else { '?' };
            Redirect::to(&format!("{}{}error={}", base, separator, code))
        }
    }
}

/// `GET /api/:platform/status`
pub async fn connection_status(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
) -> Result<Json<StatusResponse>, ApiError> {
    let mut orchestrator = restore(&state, &user).await;
    let is_connected = orchestrator.refresh_status(platform).await?;
    Ok(Json(StatusResponse { is_connected }))
}

/// `POST /api/:platform/post`: publish to one platform, selected or not
///
/// Remote failures come back as 502 with the failed outcome as the body.
pub async fn publish_single(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
    Json(body): Json<PostRequest>,
) -> Result<Response, ApiError> {
    let connector = state.connectors.get(platform)?;
    connector.validate_content(&body.text)?;

    let report = state
        .dispatcher
        .publish_to(&user, &body.text, &[platform])
        .await;
    let outcome = report
        .outcomes
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal("Publish produced no outcome".to_string()))?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)).into_response())
}

/// `POST /api/:platform/logout`
pub async fn logout(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    PlatformParam(platform): PlatformParam,
) -> Result<Response, ApiError> {
    let mut orchestrator = restore(&state, &user).await;
    if orchestrator.disconnect(platform).await? {
        return Ok(Json(SuccessResponse {
            success: true,
            error: None,
        })
        .into_response());
    }

    let body = SuccessResponse {
        success: false,
        error: Some(format!("Failed to remove stored {} credentials", platform.display_name())),
    };
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
}

/// `POST /api/publish`: fan out to every connected, selected platform
pub async fn publish_selected(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<PostRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let mut buffer = ComposeBuffer::new(body.text);
    if buffer.is_blank() {
        return Err(ApiError::BadRequest("Post text is required".to_string()));
    }

    let orchestrator =
        ConnectionOrchestrator::load(user.as_str(), state.connectors.clone(), state.store.clone())
            .await;
    let selected = orchestrator.selected();

    let report = state
        .dispatcher
        .publish_to_selected(&user, &mut buffer, &selected)
        .await
        .ok_or_else(|| ApiError::Conflict("No connected platform is selected".to_string()))?;

    Ok(Json(PublishResponse {
        succeeded: report.succeeded,
        failed: report.failed,
        cleared: buffer.is_blank(),
        outcomes: report.outcomes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_shapes() {
        let oauth = serde_json::to_value(LoginResponse::from(LoginStart::AuthUrl(
            "https://example.com/authorize".to_string(),
        )))
        .unwrap();
        assert_eq!(
            oauth,
            serde_json::json!({ "authUrl": "https://example.com/authorize" })
        );

        let creds = serde_json::to_value(LoginResponse::from(LoginStart::CredentialsRequired))
            .unwrap();
        assert_eq!(creds, serde_json::json!({ "credentialsRequired": true }));
    }

    #[test]
    fn test_redirect_appends_error_code() {
        let response = app_redirect("http://localhost:5173/", Some("twitter_login_failed"))
            .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()["location"],
            "http://localhost:5173/?error=twitter_login_failed"
        );

        let response = app_redirect("http://localhost:5173/?tab=compose", Some("login_failed"))
            .into_response();
        assert_eq!(
            response.headers()["location"],
            "http://localhost:5173/?tab=compose&error=login_failed"
        );
    }
}
