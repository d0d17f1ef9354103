//! Core types for JustPost

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// The closed set of platforms JustPost can publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Bluesky,
    Twitter,
    #[serde(rename = "linkedin")]
    LinkedIn,
    Threads,
}

impl PlatformId {
    pub const ALL: [PlatformId; 4] = [
        PlatformId::Bluesky,
        PlatformId::Twitter,
        PlatformId::LinkedIn,
        PlatformId::Threads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Bluesky => "bluesky",
            PlatformId::Twitter => "twitter",
            PlatformId::LinkedIn => "linkedin",
            PlatformId::Threads => "threads",
        }
    }

    /// Human-facing name used in user-visible messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformId::Bluesky => "BlueSky",
            PlatformId::Twitter => "Twitter",
            PlatformId::LinkedIn => "LinkedIn",
            PlatformId::Threads => "Threads",
        }
    }

    /// Maximum post length in Unicode scalar values.
    pub fn character_limit(&self) -> usize {
        match self {
            PlatformId::Bluesky => 300,
            PlatformId::Twitter => 280,
            PlatformId::LinkedIn => 3000,
            PlatformId::Threads => 500,
        }
    }

    /// Whether login goes through an OAuth redirect rather than a credential form.
    pub fn uses_oauth(&self) -> bool {
        !matches!(self, PlatformId::Bluesky)
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bluesky" => Ok(PlatformId::Bluesky),
            "twitter" | "x" => Ok(PlatformId::Twitter),
            "linkedin" => Ok(PlatformId::LinkedIn),
            "threads" => Ok(PlatformId::Threads),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: bluesky, twitter, linkedin, threads",
                s
            )),
        }
    }
}

/// Where a platform sits in the per-user connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPhase {
    NotAdded,
    AddedDisconnected,
    ConnectedUnselected,
    ConnectedSelected,
}

/// Connection state of one platform for one user.
///
/// Always satisfies `is_selected => is_connected => is_added`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConnectionState {
    pub id: PlatformId,
    pub is_added: bool,
    pub is_connected: bool,
    pub is_selected: bool,
}

impl PlatformConnectionState {
    /// Build a state, normalising the flags so the invariant holds.
    pub fn new(id: PlatformId, is_added: bool, is_connected: bool, is_selected: bool) -> Self {
        let is_selected = is_selected && is_connected;
        let is_added = is_added || is_connected;
        Self {
            id,
            is_added,
            is_connected,
            is_selected,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        match (self.is_added, self.is_connected, self.is_selected) {
            (_, true, true) => ConnectionPhase::ConnectedSelected,
            (_, true, false) => ConnectionPhase::ConnectedUnselected,
            (true, false, _) => ConnectionPhase::AddedDisconnected,
            (false, false, _) => ConnectionPhase::NotAdded,
        }
    }

    /// Eligible for fan-out publishing.
    pub fn is_publishable(&self) -> bool {
        self.is_connected && self.is_selected
    }
}

/// Result of publishing to a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOutcome {
    pub platform: PlatformId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PostOutcome {
    pub fn success(platform: PlatformId, post_id: impl Into<String>) -> Self {
        Self {
            platform,
            success: true,
            post_id: Some(post_id.into()),
            error: None,
        }
    }

    pub fn failure(platform: PlatformId, error: impl Into<String>) -> Self {
        Self {
            platform,
            success: false,
            post_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPost {
    pub platform: PlatformId,
    pub error: String,
}

/// Aggregated result of a fan-out publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub succeeded: Vec<PlatformId>,
    pub failed: Vec<FailedPost>,
    #[serde(skip)]
    pub outcomes: Vec<PostOutcome>,
}

impl Report {
    pub fn from_outcomes(outcomes: Vec<PostOutcome>) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for outcome in &outcomes {
            if outcome.success {
                succeeded.push(outcome.platform);
            } else {
                failed.push(FailedPost {
                    platform: outcome.platform,
                    error: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
        }

        Self {
            succeeded,
            failed,
            outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && !self.succeeded.is_empty()
    }
}

/// Text the user is composing; cleared only after a fully successful fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeBuffer {
    text: String,
}

impl ComposeBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

/// BlueSky identifier plus application password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueskyCredentials {
    pub identifier: String,
    pub password: String,
}

impl BlueskyCredentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.identifier.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for BlueskyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueskyCredentials")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Drop for BlueskyCredentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInTokens {
    pub access_token: String,
    pub person_urn: String,
    pub expires_at: i64,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadsTokens {
    pub access_token: String,
    pub user_id: String,
    pub expires_at: i64,
}

impl fmt::Debug for TwitterTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Debug for LinkedInTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedInTokens")
            .field("access_token", &"[REDACTED]")
            .field("person_urn", &self.person_urn)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Debug for ThreadsTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadsTokens")
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Per-user, per-platform material kept in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum StoredCredential {
    Bluesky(BlueskyCredentials),
    Twitter(TwitterTokens),
    #[serde(rename = "linkedin")]
    LinkedIn(LinkedInTokens),
    Threads(ThreadsTokens),
}

impl StoredCredential {
    pub fn platform(&self) -> PlatformId {
        match self {
            StoredCredential::Bluesky(_) => PlatformId::Bluesky,
            StoredCredential::Twitter(_) => PlatformId::Twitter,
            StoredCredential::LinkedIn(_) => PlatformId::LinkedIn,
            StoredCredential::Threads(_) => PlatformId::Threads,
        }
    }

    /// Expiry in unix milliseconds, if the credential expires at all.
    pub fn expires_at(&self) -> Option<i64> {
        match self {
            StoredCredential::Bluesky(_) => None,
            StoredCredential::Twitter(t) => Some(t.expires_at),
            StoredCredential::LinkedIn(t) => Some(t.expires_at),
            StoredCredential::Threads(t) => Some(t.expires_at),
        }
    }
}

/// Material for an in-flight OAuth round trip.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthState {
    pub state_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
}

impl fmt::Debug for PendingAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthState")
            .field("state_token", &self.state_token)
            .field(
                "code_verifier",
                &self.code_verifier.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a token that lives `expires_in_secs` from now.
pub fn expires_at_from_now(expires_in_secs: i64) -> i64 {
    now_millis().saturating_add(expires_in_secs.saturating_mul(1000))
}

/// True when `now < expires_at - window`.
pub fn is_outside_window(expires_at: i64, window: Duration) -> bool {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_millis() < expires_at.saturating_sub(window_ms)
}
