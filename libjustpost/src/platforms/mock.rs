//! Mock connector implementation for testing
//!
//! This module provides a configurable mock connector that can simulate
//! connected and disconnected accounts, publish successes and failures,
//! panics and network latency. It is used by orchestrator, dispatcher and
//! server tests to exercise multi-platform logic without real credentials or
//! network access.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::pkce::{decode_state_token, generate_state_token};
use crate::platforms::{Connector, LoginStart};
use crate::types::{BlueskyCredentials, PlatformId, PostOutcome};

/// Configuration for mock connector behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: PlatformId,

    /// Whether the account starts out connected
    pub connected: bool,

    /// Whether login (credentials or callback) should succeed
    pub login_succeeds: bool,

    /// Whether publishing should succeed
    pub publish_succeeds: bool,

    /// Error to report on publish failure
    pub publish_error: Option<String>,

    /// Panic inside publish instead of returning
    pub panic_on_publish: bool,

    /// Delay before completing publish (simulates network latency)
    pub delay: Duration,

    /// Number of times publish has been called
    pub publish_call_count: Arc<AtomicUsize>,

    /// Number of times verify_and_refresh has been called
    pub verify_call_count: Arc<AtomicUsize>,

    /// Number of times disconnect has been called
    pub disconnect_call_count: Arc<AtomicUsize>,

    /// Publishes currently running, and the most seen at once
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,

    /// Posts that have been made (for verification)
    pub published_content: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            connected: true,
            login_succeeds: true,
            publish_succeeds: true,
            publish_error: None,
            panic_on_publish: false,
            delay: Duration::from_millis(0),
            publish_call_count: Arc::new(AtomicUsize::new(0)),
            verify_call_count: Arc::new(AtomicUsize::new(0)),
            disconnect_call_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock connector for testing
pub struct MockConnector {
    config: MockConfig,
    connected: AtomicBool,
    pending_state: Mutex<Option<String>>,
}

impl MockConnector {
    /// Create a new mock connector with the given configuration
    pub fn new(config: MockConfig) -> Self {
        let connected = AtomicBool::new(config.connected);
        Self {
            config,
            connected,
            pending_state: Mutex::new(None),
        }
    }

    /// Connected, and every operation succeeds
    pub fn success(platform: PlatformId) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// Not connected until a login completes
    pub fn disconnected(platform: PlatformId) -> Self {
        Self::new(MockConfig {
            connected: false,
            ..MockConfig::new(platform)
        })
    }

    /// Connected, but publishing fails with `error`
    pub fn publish_failure(platform: PlatformId, error: &str) -> Self {
        Self::new(MockConfig {
            publish_succeeds: false,
            publish_error: Some(error.to_string()),
            ..MockConfig::new(platform)
        })
    }

    /// Connected, but publishing panics
    pub fn panicking(platform: PlatformId) -> Self {
        Self::new(MockConfig {
            panic_on_publish: true,
            ..MockConfig::new(platform)
        })
    }

    /// Connected, logins are rejected
    pub fn login_failure(platform: PlatformId) -> Self {
        Self::new(MockConfig {
            connected: false,
            login_succeeds: false,
            ..MockConfig::new(platform)
        })
    }

    /// Connected, publishing takes `delay`
    pub fn with_delay(platform: PlatformId, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drop the connection as if the provider revoked it
    pub fn revoke(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        self.config.publish_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times verify_and_refresh was called
    pub fn verify_call_count(&self) -> usize {
        self.config.verify_call_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_call_count(&self) -> usize {
        self.config.disconnect_call_count.load(Ordering::SeqCst)
    }

    /// Highest number of publishes that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.config.max_in_flight.load(Ordering::SeqCst)
    }

    /// Get all content that was published
    pub fn published_content(&self) -> Vec<String> {
        self.config
            .published_content
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn set_pending(&self, state: Option<String>) {
        if let Ok(mut pending) = self.pending_state.lock() {
            *pending = state;
        }
    }

    fn take_pending(&self) -> Option<String> {
        self.pending_state.lock().ok().and_then(|mut p| p.take())
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn platform(&self) -> PlatformId {
        self.config.platform
    }

    async fn start_login(&self, _user_id: &str) -> Result<LoginStart> {
        if !self.config.platform.uses_oauth() {
            return Ok(LoginStart::CredentialsRequired);
        }

        let state = generate_state_token(self.config.platform);
        self.set_pending(Some(state.clone()));
        Ok(LoginStart::AuthUrl(format!(
            "https://mock.example/{}/authorize?state={}",
            self.config.platform, state
        )))
    }

    async fn submit_credentials(&self, _user_id: &str, credentials: &BlueskyCredentials) -> bool {
        if self.config.platform.uses_oauth() || !credentials.is_complete() {
            return false;
        }
        if self.config.login_succeeds {
            self.connected.store(true, Ordering::SeqCst);
        }
        self.config.login_succeeds
    }

    async fn complete_callback(&self, _user_id: &str, _code: &str, state: &str) -> bool {
        let Some(expected) = self.take_pending() else {
            return false;
        };
        let platform_matches = decode_state_token(state)
            .map(|payload| payload.platform == self.config.platform)
            .unwrap_or(false);

        if expected != state || !platform_matches || !self.config.login_succeeds {
            return false;
        }

        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn cancel_login(&self, _user_id: &str) -> bool {
        self.set_pending(None);
        true
    }

    async fn verify_and_refresh(&self, _user_id: &str) -> bool {
        self.config.verify_call_count.fetch_add(1, Ordering::SeqCst);
        self.is_connected()
    }

    async fn publish(&self, _user_id: &str, text: &str) -> PostOutcome {
        self.config.publish_call_count.fetch_add(1, Ordering::SeqCst);

        let running = self.config.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.config.max_in_flight.fetch_max(running, Ordering::SeqCst);

        // Simulate delay
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        self.config.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.config.panic_on_publish {
            panic!("mock connector for {} panicked", self.config.platform);
        }

        if !self.is_connected() {
            return PostOutcome::failure(
                self.config.platform,
                PlatformError::NotConnected(self.config.platform).to_string(),
            );
        }

        if !self.config.publish_succeeds {
            let error = self
                .config
                .publish_error
                .clone()
                .unwrap_or_else(|| "Mock publishing failed".to_string());
            return PostOutcome::failure(self.config.platform, PlatformError::Posting(error).to_string());
        }

        if let Ok(mut content) = self.config.published_content.lock() {
            content.push(text.to_string());
        }

        // Generate mock post ID
        let post_id = format!("{}:mock-{}", self.config.platform, uuid::Uuid::new_v4());
        PostOutcome::success(self.config.platform, post_id)
    }

    async fn disconnect(&self, _user_id: &str) -> bool {
        self.config.disconnect_call_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        true
    }
}
