//! Shared HTTP plumbing for platform connectors.

use std::time::Duration;

use reqwest::{Response, StatusCode};

use crate::error::{ConfigError, PlatformError};
use crate::types::PlatformId;

const MAX_PROVIDER_MESSAGE: usize = 200;

/// Build the client every connector shares.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("justpost/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::InvalidValue(format!("http client: {}", e)))
}

/// Map a transport-level failure (connect, timeout, body decode)
pub fn map_request_error(platform: PlatformId, context: &str, error: reqwest::Error) -> PlatformError {
    tracing::warn!(platform = %platform, context, error = %error, "Request failed");

    if error.is_timeout() {
        return PlatformError::Network(format!(
            "{} timed out during {}",
            platform.display_name(),
            context
        ));
    }
    if error.is_connect() || error.is_request() {
        return PlatformError::Network(format!(
            "Could not reach {} during {}",
            platform.display_name(),
            context
        ));
    }
    if error.is_decode() {
        return PlatformError::Remote(format!(
            "{} sent an unreadable response during {}",
            platform.display_name(),
            context
        ));
    }

    PlatformError::Network(format!(
        "{} request failed during {}",
        platform.display_name(),
        context
    ))
}

/// Map a non-success HTTP response into a [`PlatformError`]
pub fn map_status(platform: PlatformId, context: &str, status: StatusCode, body: &str) -> PlatformError {
    let detail = provider_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });
    let name = platform.display_name();
    let code = status.as_u16();

    match code {
        401 | 403 => PlatformError::Authentication(format!(
            "{} returned {} during {}: {}. Please reconnect {}.",
            name, code, context, detail, name
        )),
        400 | 422 => PlatformError::Validation(format!(
            "{} rejected the request during {}: {}",
            name, context, detail
        )),
        429 => PlatformError::RateLimit(format!(
            "{} rate limit exceeded during {}: {}. Please wait before trying again.",
            name, context, detail
        )),
        500..=599 => PlatformError::Remote(format!(
            "{} returned {} during {}: {}",
            name, code, context, detail
        )),
        _ => PlatformError::Posting(format!(
            "{} returned {} during {}: {}",
            name, code, context, detail
        )),
    }
}

/// Consume a failed response, log the raw payload and map it.
pub async fn error_from_response(platform: PlatformId, context: &str, response: Response) -> PlatformError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(
        platform = %platform,
        context,
        status = status.as_u16(),
        body = %body,
        "Platform returned an error"
    );

    map_status(platform, context, status, &body)
}

/// Pull a human-readable message out of a JSON error body.
///
/// Understands the shapes used by the supported providers: top-level
/// `message`/`detail`/`error_description`/`title`, a string `error`, a nested
/// `error.message`, and Twitter's `errors[0].message`.
pub fn provider_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;

    let candidates = [
        json.get("message"),
        json.get("detail"),
        json.get("error_description"),
        json.get("title"),
        json.get("error").filter(|e| e.is_string()),
        json.get("error").and_then(|e| e.get("message")),
        json.get("errors")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("message")),
    ];

    let message = candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_PROVIDER_MESSAGE).collect());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status_authentication() {
        let err = map_status(PlatformId::Twitter, "post", StatusCode::UNAUTHORIZED, "");
        assert!(err.is_authentication());
        assert!(err.to_string().contains("Twitter returned 401 during post: Unauthorized"));
    }

    #[test]
    fn test_map_status_validation_uses_provider_message() {
        let err = map_status(
            PlatformId::Bluesky,
            "post",
            StatusCode::BAD_REQUEST,
            r#"{"error":"InvalidRequest","message":"Record/text must not be longer than 300 graphemes"}"#,
        );
        assert!(matches!(err, PlatformError::Validation(_)));
        assert!(err.to_string().contains("must not be longer than 300 graphemes"));
    }

    #[test]
    fn test_map_status_rate_limit_and_remote() {
        assert!(matches!(
            map_status(PlatformId::Threads, "publish", StatusCode::TOO_MANY_REQUESTS, ""),
            PlatformError::RateLimit(_)
        ));
        assert!(matches!(
            map_status(PlatformId::LinkedIn, "post", StatusCode::BAD_GATEWAY, ""),
            PlatformError::Remote(_)
        ));
        assert!(matches!(
            map_status(PlatformId::LinkedIn, "post", StatusCode::CONFLICT, ""),
            PlatformError::Posting(_)
        ));
    }

    #[test]
    fn test_provider_message_shapes() {
        assert_eq!(
            provider_message(r#"{"detail":"You are not permitted"}"#).as_deref(),
            Some("You are not permitted")
        );
        assert_eq!(
            provider_message(r#"{"error":{"message":"Invalid OAuth access token","code":190}}"#)
                .as_deref(),
            Some("Invalid OAuth access token")
        );
        assert_eq!(
            provider_message(r#"{"errors":[{"message":"Duplicate content"}]}"#).as_deref(),
            Some("Duplicate content")
        );
        assert_eq!(
            provider_message(r#"{"error":"invalid_grant","error_description":"Code expired"}"#)
                .as_deref(),
            Some("Code expired")
        );
        assert_eq!(provider_message("<html>bad gateway</html>"), None);
        assert_eq!(provider_message(r#"{"message":"   "}"#), None);
    }

    #[test]
    fn test_provider_message_is_truncated() {
        let long = format!(r#"{{"message":"{}"}}"#, "x".repeat(1000));
        assert_eq!(provider_message(&long).unwrap().len(), MAX_PROVIDER_MESSAGE);
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
