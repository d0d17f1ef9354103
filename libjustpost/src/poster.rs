//! Fan-out publishing
//!
//! [`Dispatcher`] sends one piece of text to every connected and selected
//! platform at once and folds the per-platform [`PostOutcome`]s into a
//! [`Report`]. Each connector already verifies or refreshes its own tokens
//! before posting, so the dispatcher only decides *who* gets the post.

use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{info, warn};

use crate::platforms::Connectors;
use crate::types::{ComposeBuffer, PlatformConnectionState, PlatformId, PostOutcome, Report};

/// Error reported for a connector that panicked mid-publish.
pub const UNEXPECTED_ERROR: &str = "Unexpected error while posting";

/// Publishes to many platforms concurrently
#[derive(Clone)]
pub struct Dispatcher {
    connectors: Connectors,
}

impl Dispatcher {
    pub fn new(connectors: Connectors) -> Self {
        Self { connectors }
    }

    pub fn connectors(&self) -> &Connectors {
        &self.connectors
    }

    /// Publish the buffer's text to every publishable platform in `states`
    ///
    /// Returns `None` without touching anything when the text is blank or no
    /// platform is both connected and selected. Otherwise every target is
    /// attempted, all outcomes are awaited, and the buffer is cleared only if
    /// every target succeeded.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libjustpost::poster::Dispatcher;
    /// use libjustpost::platforms::Connectors;
    /// use libjustpost::types::{ComposeBuffer, PlatformConnectionState, PlatformId};
    ///
    /// # async fn example(connectors: Connectors) {
    /// let dispatcher = Dispatcher::new(connectors);
    /// let mut buffer = ComposeBuffer::new("Hello from everywhere");
    /// let states = [PlatformConnectionState::new(PlatformId::Bluesky, true, true, true)];
    ///
    /// if let Some(report) = dispatcher.publish_to_selected("user-1", &mut buffer, &states).await {
    ///     println!("posted to {:?}, failed on {:?}", report.succeeded, report.failed);
    /// }
    /// # }
    /// ```
    pub async fn publish_to_selected(
        &self,
        user_id: &str,
        buffer: &mut ComposeBuffer,
        states: &[PlatformConnectionState],
    ) -> Option<Report> {
        if buffer.is_blank() {
            return None;
        }

        // Snapshot the targets before the first await.
        let targets = selected_targets(states);
        if targets.is_empty() {
            return None;
        }

        let report = self.publish_to(user_id, buffer.text(), &targets).await;

        if report.all_succeeded() {
            buffer.clear();
        }

        Some(report)
    }

    /// Publish `text` to exactly `targets`, concurrently
    ///
    /// Over-limit text and unconfigured platforms become failed outcomes
    /// without any connector call. Outcomes keep the order of `targets`.
    pub async fn publish_to(&self, user_id: &str, text: &str, targets: &[PlatformId]) -> Report {
        let futures = targets.iter().map(|&platform| self.publish_one(user_id, text, platform));
        let outcomes = join_all(futures).await;

        let report = Report::from_outcomes(outcomes);
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Fan-out publish finished"
        );
        report
    }

    async fn publish_one(&self, user_id: &str, text: &str, platform: PlatformId) -> PostOutcome {
        let connector = match self.connectors.get(platform) {
            Ok(connector) => connector,
            Err(e) => {
                warn!(platform = %platform, error = %e, "No connector for selected platform");
                return PostOutcome::failure(platform, e.to_string());
            }
        };

        if let Err(e) = connector.validate_content(text) {
            return PostOutcome::failure(platform, e.to_string());
        }

        info!(platform = %platform, "Posting to platform");

        match AssertUnwindSafe(connector.publish(user_id, text))
            .catch_unwind()
            .await
        {
            Ok(outcome) => {
                if outcome.success {
                    info!(platform = %platform, post_id = ?outcome.post_id, "Posted");
                } else {
                    warn!(platform = %platform, error = ?outcome.error, "Post failed");
                }
                outcome
            }
            Err(_) => {
                warn!(platform = %platform, "Connector panicked while posting");
                PostOutcome::failure(platform, UNEXPECTED_ERROR)
            }
        }
    }
}

/// Platforms that are connected and selected, deduplicated, in input order.
pub fn selected_targets(states: &[PlatformConnectionState]) -> Vec<PlatformId> {
    let mut targets: Vec<PlatformId> = Vec::new();
    for state in states.iter().filter(|s| s.is_publishable()) {
        if !targets.contains(&state.id) {
            targets.push(state.id);
        }
    }
    targets
}
