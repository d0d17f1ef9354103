//! JustPost - compose once, publish to BlueSky, Twitter/X, LinkedIn and Threads
//!
//! This library holds the connection and posting core: PKCE and state tokens,
//! the encrypted secret store, one connector per platform, the per-user
//! connection orchestrator and the fan-out dispatcher.

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pkce;
pub mod platforms;
pub mod poster;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{JustPostError, Result};
pub use orchestrator::{CallbackResult, ConnectionOrchestrator, PlatformPrefs};
pub use platforms::{Connector, Connectors, LoginStart};
pub use poster::Dispatcher;
pub use store::SecretStore;
pub use types::{
    ComposeBuffer, PlatformConnectionState, PlatformId, PostOutcome, Report, StoredCredential,
};
