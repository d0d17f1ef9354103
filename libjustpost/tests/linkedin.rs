//! LinkedIn connector against a mocked provider

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use libjustpost::config::{LinkedInConfig, LinkedInEndpoints, OAuthClientConfig};
use libjustpost::platforms::linkedin::LinkedInConnector;
use libjustpost::platforms::{http, Connector, LoginStart};
use libjustpost::store::{SecretStore, StorePrefix};
use libjustpost::types::{expires_at_from_now, LinkedInTokens, StoredCredential};
use serde_json::json;
use wiremock::matchers::{
    any, bearer_token, body_partial_json, body_string_contains, header, method, path,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer, store: SecretStore) -> LinkedInConnector {
    let base = server.uri();
    let config = LinkedInConfig {
        client: OAuthClientConfig::new(
            "li-client",
            "li-secret",
            "http://localhost:3000/api/callback",
        ),
        endpoints: LinkedInEndpoints {
            authorize: format!("{}/oauth/v2/authorization", base),
            token: format!("{}/oauth/v2/accessToken", base),
            revoke: format!("{}/oauth/v2/revoke", base),
            api: format!("{}/v2", base),
        },
    };
    let client = http::build_client(Duration::from_secs(5)).unwrap();
    LinkedInConnector::new(&config, client, store)
}

fn id_token(sub: &str) -> String {
    format!(
        "{}.{}.not-a-real-signature",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#),
        URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "name": "Ada Lovelace" }).to_string())
    )
}

fn state_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

async fn store_tokens(store: &SecretStore, expires_in_secs: i64) {
    let tokens = StoredCredential::LinkedIn(LinkedInTokens {
        access_token: "li-token".to_string(),
        person_urn: "urn:li:person:abc123".to_string(),
        expires_at: expires_at_from_now(expires_in_secs),
    });
    assert!(store.set(StorePrefix::LinkedInTokens, "u1", &tokens, None).await);
}

async fn stored_tokens(store: &SecretStore) -> Option<LinkedInTokens> {
    match store
        .get::<StoredCredential>(StorePrefix::LinkedInTokens, "u1")
        .await?
    {
        StoredCredential::LinkedIn(tokens) => Some(tokens),
        _ => None,
    }
}

#[tokio::test]
async fn test_login_extracts_person_urn_from_id_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=li-code"))
        .and(body_string_contains("client_secret=li-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "li-token",
            "expires_in": 5184000,
            "scope": "email,openid,profile,w_member_social",
            "token_type": "Bearer",
            "id_token": id_token("abc123")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    let connector = connector(&server, store.clone());

    let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
        panic!("expected an authorization URL");
    };
    assert!(!url.contains("code_challenge"));

    assert!(connector.complete_callback("u1", "li-code", &state_of(&url)).await);

    let tokens = stored_tokens(&store).await.unwrap();
    assert_eq!(tokens.person_urn, "urn:li:person:abc123");
    assert_eq!(tokens.access_token, "li-token");
}

#[tokio::test]
async fn test_login_without_id_token_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "li-token",
            "expires_in": 5184000
        })))
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    let connector = connector(&server, store.clone());

    let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
        panic!("expected an authorization URL");
    };
    assert!(!connector.complete_callback("u1", "li-code", &state_of(&url)).await);
    assert!(stored_tokens(&store).await.is_none());
}

#[tokio::test]
async fn test_publish_ugc_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/ugcPosts"))
        .and(bearer_token("li-token"))
        .and(header("X-Restli-Protocol-Version", "2.0.0"))
        .and(body_partial_json(json!({
            "author": "urn:li:person:abc123",
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": "hello linkedin" },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-restli-id", "urn:li:share:7000000000000000000"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, 60 * 24 * 3600).await;

    let outcome = connector(&server, store).publish("u1", "hello linkedin").await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(
        outcome.post_id.as_deref(),
        Some("urn:li:share:7000000000000000000")
    );
}

#[tokio::test]
async fn test_publish_falls_back_to_body_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/ugcPosts"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "urn:li:share:1" })),
        )
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, 60 * 24 * 3600).await;

    let outcome = connector(&server, store).publish("u1", "hello").await;
    assert_eq!(outcome.post_id.as_deref(), Some("urn:li:share:1"));
}

#[tokio::test]
async fn test_publish_non_created_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/ugcPosts"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Content is a duplicate",
            "status": 422
        })))
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, 60 * 24 * 3600).await;

    let outcome = connector(&server, store).publish("u1", "hello").await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("Content is a duplicate"));
}

#[tokio::test]
async fn test_expiring_token_forces_relogin_without_calls() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, 60).await;
    let connector = connector(&server, store.clone());

    let outcome = connector.publish("u1", "hello").await;
    assert!(!outcome.success);
    assert!(stored_tokens(&store).await.is_none());
}

#[tokio::test]
async fn test_disconnect_succeeds_when_revoke_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/revoke"))
        .and(body_string_contains("token=li-token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = SecretStore::in_memory();
    store_tokens(&store, 60 * 24 * 3600).await;

    assert!(connector(&server, store.clone()).disconnect("u1").await);
    assert!(stored_tokens(&store).await.is_none());
}
