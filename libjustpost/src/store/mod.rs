//! Encrypted per-user key-value storage
//!
//! [`SecretStore`] is the only shared mutable resource in JustPost. Values are
//! serialized to JSON, sealed with age and handed to a [`KvBackend`] under the
//! key `"<prefix>:<user_id>"`.
//!
//! The facade never returns errors. A failed `get` is `None`, a failed `set`
//! or `delete` is `false`, and the cause is logged. Callers therefore read
//! `None`/`false` as "the operation did not happen", and a value that cannot
//! be decrypted is indistinguishable from an absent one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroize;

use crate::error::StoreError;

pub mod memory;
pub mod seal;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use seal::Sealer;
pub use sqlite::SqliteBackend;

/// Closed set of key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorePrefix {
    BlueskyCredentials,
    TwitterPkce,
    TwitterTokens,
    LinkedInCodes,
    LinkedInTokens,
    ThreadsCodes,
    ThreadsTokens,
    PlatformPrefs,
}

impl StorePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorePrefix::BlueskyCredentials => "bluesky",
            StorePrefix::TwitterPkce => "twitter_pkce",
            StorePrefix::TwitterTokens => "twitter_tokens",
            StorePrefix::LinkedInCodes => "linkedin_codes",
            StorePrefix::LinkedInTokens => "linkedin_tokens",
            StorePrefix::ThreadsCodes => "threads_codes",
            StorePrefix::ThreadsTokens => "threads_tokens",
            StorePrefix::PlatformPrefs => "platform_prefs",
        }
    }

    pub fn key(&self, user_id: &str) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

impl fmt::Display for StorePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw byte storage with optional per-entry expiry.
///
/// Expired entries must read as absent.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns whether a value was present.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Typed, sealed view over a [`KvBackend`].
#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn KvBackend>,
    sealer: Arc<Sealer>,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn KvBackend>, sealer: Sealer) -> Self {
        Self {
            backend,
            sealer: Arc::new(sealer),
        }
    }

    /// Memory-backed store with a throwaway key.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Sealer::generate())
    }

    pub async fn get<T: DeserializeOwned>(&self, prefix: StorePrefix, user_id: &str) -> Option<T> {
        match self.try_get(prefix, user_id).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(prefix = %prefix, error = %e, "Secret store read failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        prefix: StorePrefix,
        user_id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match self.try_set(prefix, user_id, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(prefix = %prefix, error = %e, "Secret store write failed");
                false
            }
        }
    }

    /// Idempotent: deleting an absent key succeeds.
    pub async fn delete(&self, prefix: StorePrefix, user_id: &str) -> bool {
        match self.backend.delete(&prefix.key(user_id)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(prefix = %prefix, error = %e, "Secret store delete failed");
                false
            }
        }
    }

    /// Read a value and remove it, so it can be used at most once.
    pub async fn take<T: DeserializeOwned>(&self, prefix: StorePrefix, user_id: &str) -> Option<T> {
        let value = self.get(prefix, user_id).await;
        if value.is_some() && !self.delete(prefix, user_id).await {
            // A value we cannot consume must not be used.
            return None;
        }
        value
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        prefix: StorePrefix,
        user_id: &str,
    ) -> Result<Option<T>, StoreError> {
        let Some(sealed) = self.backend.get(&prefix.key(user_id)).await? else {
            return Ok(None);
        };

        let mut plaintext = self.sealer.open(&sealed)?;
        let value = serde_json::from_slice(&plaintext);
        plaintext.zeroize();

        Ok(Some(value?))
    }

    async fn try_set<T: Serialize>(
        &self,
        prefix: StorePrefix,
        user_id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut plaintext = serde_json::to_vec(value)?;
        let sealed = self.sealer.seal(&plaintext);
        plaintext.zeroize();

        self.backend.set(&prefix.key(user_id), sealed?, ttl).await
    }
}
