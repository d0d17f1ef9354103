//! Request extractors for user identity and platform path segments

use axum::async_trait;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use libjustpost::types::PlatformId;

use crate::error::ApiError;
use crate::AppState;

/// The user id supplied by the fronting auth layer in `server.user_header`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&state.user_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| AuthenticatedUser(value.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

/// The `:platform` path segment; anything outside the supported set is a 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformParam(pub PlatformId);

#[async_trait]
impl<S> FromRequestParts<S> for PlatformParam
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(segment) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        segment
            .parse()
            .map(PlatformParam)
            .map_err(|_| ApiError::UnknownPlatform(segment))
    }
}
