//! Twitter connector against a mocked provider
//!
//! Covers the PKCE login round trip, replay and state mismatch rejection,
//! the safety-window refresh policy, the 401 retry on publish and
//! best-effort revocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use libjustpost::config::{OAuthClientConfig, TwitterConfig, TwitterEndpoints};
use libjustpost::pkce::{generate_code_challenge, generate_state_token};
use libjustpost::platforms::twitter::TwitterConnector;
use libjustpost::platforms::{http, Connector, LoginStart};
use libjustpost::error::StoreError;
use libjustpost::store::{KvBackend, MemoryBackend, Sealer, SecretStore, StorePrefix};
use libjustpost::types::{
    expires_at_from_now, PendingAuthState, PlatformId, StoredCredential, TwitterTokens,
};
use serde_json::json;
use wiremock::matchers::{any, basic_auth, bearer_token, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer, store: SecretStore) -> TwitterConnector {
    connector_with_timeout(server, store, Duration::from_secs(5))
}

fn connector_with_timeout(
    server: &MockServer,
    store: SecretStore,
    timeout: Duration,
) -> TwitterConnector {
    let base = server.uri();
    let config = TwitterConfig {
        client: OAuthClientConfig::new(
            "tw-client",
            "tw-secret",
            "http://localhost:3000/api/callback",
        ),
        endpoints: TwitterEndpoints {
            authorize: format!("{}/i/oauth2/authorize", base),
            token: format!("{}/2/oauth2/token", base),
            revoke: format!("{}/2/oauth2/revoke", base),
            api: format!("{}/2", base),
        },
    };
    TwitterConnector::new(&config, http::build_client(timeout).unwrap(), store)
}

/// Memory store whose writes start failing once frozen; reads and deletes
/// keep working.
#[derive(Default)]
struct FreezableBackend {
    inner: MemoryBackend,
    frozen: AtomicBool,
}

impl FreezableBackend {
    fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvBackend for FreezableBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
}

fn freezable_store() -> (SecretStore, Arc<FreezableBackend>) {
    let backend = Arc::new(FreezableBackend::default());
    (SecretStore::new(backend.clone(), Sealer::generate()), backend)
}

fn query_param(url: &str, name: &str) -> String {
    reqwest::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

async fn store_tokens(store: &SecretStore, access: &str, refresh: &str, expires_in_secs: i64) {
    let tokens = StoredCredential::Twitter(TwitterTokens {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: expires_at_from_now(expires_in_secs),
    });
    assert!(store.set(StorePrefix::TwitterTokens, "u1", &tokens, None).await);
}

async fn stored_tokens(store: &SecretStore) -> Option<TwitterTokens> {
    match store
        .get::<StoredCredential>(StorePrefix::TwitterTokens, "u1")
        .await?
    {
        StoredCredential::Twitter(tokens) => Some(tokens),
        _ => None,
    }
}

#[tokio::test]
async fn test_login_round_trip_with_pkce() {
    let server = MockServer::start().await;
    let store = SecretStore::in_memory();
    let connector = connector(&server, store.clone());

    let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
        panic!("expected an authorization URL");
    };
    let state = query_param(&url, "state");
    let challenge = query_param(&url, "code_challenge");

    let pending: PendingAuthState = store.get(StorePrefix::TwitterPkce, "u1").await.unwrap();
    let verifier = pending.code_verifier.unwrap();
    assert_eq!(generate_code_challenge(&verifier), challenge);
    assert_eq!(pending.state_token, state);

    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .and(basic_auth("tw-client", "tw-secret"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code_verifier={}", verifier)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 7200,
            "scope": "tweet.read tweet.write users.read offline.access"
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(connector.complete_callback("u1", "auth-code", &state).await);

    let tokens = stored_tokens(&store).await.unwrap();
    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.refresh_token, "rt-1");

    // Replaying the same callback must not exchange the code again
    assert!(!connector.complete_callback("u1", "auth-code", &state).await);
}

#[tokio::test]
async fn test_state_mismatch_never_exchanges() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    let connector = connector(&server, store.clone());

    let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
        panic!("expected an authorization URL");
    };
    let real_state = query_param(&url, "state");
    let forged = generate_state_token(PlatformId::Twitter);

    assert!(!connector.complete_callback("u1", "code", &forged).await);
    // The pending state was consumed by the failed attempt
    assert!(!connector.complete_callback("u1", "code", &real_state).await);
    assert!(stored_tokens(&store).await.is_none());
}

#[tokio::test]
async fn test_failed_exchange_keeps_previous_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Value passed for the authorization code was invalid."
        })))
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-old", "rt-old", 7200).await;
    let connector = connector(&server, store.clone());

    let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
        panic!("expected an authorization URL");
    };
    assert!(!connector.complete_callback("u1", "bad-code", &query_param(&url, "state")).await);

    assert_eq!(stored_tokens(&store).await.unwrap().access_token, "at-old");
}

#[tokio::test]
async fn test_fresh_tokens_make_no_network_calls() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 3600).await;

    assert!(connector(&server, store).verify_and_refresh("u1").await);
}

#[tokio::test]
async fn test_expiring_tokens_refresh_after_failed_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/users/me"))
        .and(bearer_token("at-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .and(basic_auth("tw-client", "tw-secret"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": "at-new",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-old", "rt-old", 60).await;

    assert!(connector(&server, store.clone()).verify_and_refresh("u1").await);

    let tokens = stored_tokens(&store).await.unwrap();
    assert_eq!(tokens.access_token, "at-new");
    // No rotated refresh token came back, so the old one is kept
    assert_eq!(tokens.refresh_token, "rt-old");
}

#[tokio::test]
async fn test_expiring_tokens_with_good_probe_are_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": "2244994945", "username": "someone" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 60).await;

    assert!(connector(&server, store).verify_and_refresh("u1").await);
}

#[tokio::test]
async fn test_failed_refresh_deletes_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Value passed for the token was invalid."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-old", "rt-old", 60).await;

    assert!(!connector(&server, store.clone()).verify_and_refresh("u1").await);
    assert!(stored_tokens(&store).await.is_none());
}

#[tokio::test]
async fn test_refresh_that_cannot_be_saved_forces_relogin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": "at-new",
            "refresh_token": "rt-rotated",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, backend) = freezable_store();
    store_tokens(&store, "at-old", "rt-old", 60).await;
    backend.freeze();

    // rt-old is rotated out remotely, so keeping it would only fail later
    assert!(!connector(&server, store.clone()).verify_and_refresh("u1").await);
    assert!(stored_tokens(&store).await.is_none());
}

#[tokio::test]
async fn test_publish_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .and(bearer_token("at-1"))
        .and(body_string_contains("hello world"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": { "id": "1445880548472328192", "text": "hello world" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 7200).await;

    let outcome = connector(&server, store).publish("u1", "hello world").await;
    assert!(outcome.success);
    assert_eq!(outcome.post_id.as_deref(), Some("1445880548472328192"));
}

#[tokio::test]
async fn test_publish_retries_once_after_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .and(bearer_token("at-revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "title": "Unauthorized",
            "detail": "Unauthorized",
            "status": 401
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "refresh_token": "rt-new",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .and(bearer_token("at-new"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": { "id": "99", "text": "hello" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-revoked", "rt-1", 7200).await;

    let outcome = connector(&server, store.clone()).publish("u1", "hello").await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.post_id.as_deref(), Some("99"));
    assert_eq!(stored_tokens(&store).await.unwrap().refresh_token, "rt-new");
}

#[tokio::test]
async fn test_publish_without_tokens_makes_no_calls() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = connector(&server, SecretStore::in_memory())
        .publish("u1", "hello")
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Not connected to twitter"));
}

#[tokio::test]
async fn test_publish_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "title": "Too Many Requests",
            "detail": "Too Many Requests",
            "status": 429
        })))
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 7200).await;

    let outcome = connector(&server, store.clone()).publish("u1", "hello").await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("Rate limit exceeded"));
    // Tokens are untouched by a non-auth failure
    assert!(stored_tokens(&store).await.is_some());
}

#[tokio::test]
async fn test_publish_timeout_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/tweets"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "data": { "id": "1", "text": "late" } }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 7200).await;

    let connector = connector_with_timeout(&server, store, Duration::from_millis(200));
    let outcome = connector.publish("u1", "hello").await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_disconnect_succeeds_when_revoke_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/revoke"))
        .and(basic_auth("tw-client", "tw-secret"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, "at-1", "rt-1", 7200).await;
    let connector = connector(&server, store.clone());

    assert!(connector.disconnect("u1").await);
    assert!(stored_tokens(&store).await.is_none());
    assert!(!connector.verify_and_refresh("u1").await);
}
