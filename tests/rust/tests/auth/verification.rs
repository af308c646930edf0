//! Verifier behavior against a live key set endpoint

use nightscout_gateway::AuthError;
use pretty_assertions::assert_eq;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::json;
use tests::keys::{ROGUE_PRIVATE_KEY_PEM, TEST_KID};
use tests::tokens::{access_claims, sign, sign_with};
use tests::{TestIdentityProvider, TEST_CLIENT_ID};

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

#[tokio::test]
async fn test_valid_access_token_authenticates() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let user = verifier.authenticate(&bearer(&idp.token("alice"))).await.unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(user.credential.client_id, TEST_CLIENT_ID);
    assert_eq!(user.credential.scopes, vec!["openid", "profile", "email"]);
    assert!(user.credential.expires_at.is_some());
}

#[tokio::test]
async fn test_key_set_fetched_once_per_issuer() {
    let idp = TestIdentityProvider::start_expecting(Some(1)).await;
    let verifier = idp.verifier();

    for username in ["alice", "bob", "carol", "alice", "bob"] {
        let credential = verifier.verify(&idp.token(username)).await.unwrap();
        assert_eq!(credential.client_id, TEST_CLIENT_ID);
    }
    // MockServer verifies the expect(1) on drop
}

#[tokio::test]
async fn test_concurrent_first_use_fetches_once() {
    let idp = TestIdentityProvider::start_expecting(Some(1)).await;
    let verifier = idp.verifier();
    let tokens: Vec<String> = (0..8).map(|i| idp.token(&format!("user{}", i))).collect();

    let results = futures::future::join_all(tokens.iter().map(|t| verifier.verify(t))).await;
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_foreign_issuer_rejected() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let claims = access_claims("https://cognito-idp.us-east-1.amazonaws.com/other", "alice");
    assert_eq!(
        verifier.verify(&sign(&claims)).await,
        Err(AuthError::InvalidToken)
    );
}

#[tokio::test]
async fn test_unpublished_key_rejected() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let token = sign_with(
        ROGUE_PRIVATE_KEY_PEM,
        Some(TEST_KID),
        &access_claims(&idp.issuer(), "mallory"),
    );
    assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
}

#[tokio::test]
async fn test_id_token_rejected() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let mut claims = access_claims(&idp.issuer(), "alice");
    claims["token_use"] = json!("id");
    assert_eq!(
        verifier.verify(&sign(&claims)).await,
        Err(AuthError::WrongTokenType)
    );
}

#[tokio::test]
async fn test_other_client_rejected() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let mut claims = access_claims(&idp.issuer(), "alice");
    claims["client_id"] = json!("someone-elses-app");
    assert_eq!(
        verifier.verify(&sign(&claims)).await,
        Err(AuthError::ClientMismatch)
    );
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let idp = TestIdentityProvider::start().await;
    let verifier = idp.verifier();

    let mut claims = access_claims(&idp.issuer(), "alice");
    claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
    assert_eq!(
        verifier.verify(&sign(&claims)).await,
        Err(AuthError::InvalidToken)
    );
}

#[tokio::test]
async fn test_unreachable_key_set_is_invalid_token() {
    let idp = TestIdentityProvider::start().await;
    let mut config = idp.config();
    config.issuer_override = Some(format!("{}/missing-pool", idp.server.uri()));
    let verifier = nightscout_gateway::TokenVerifier::new(
        config.clone(),
        std::sync::Arc::new(nightscout_gateway::IssuerKeyCache::new()),
    );

    let token = sign(&access_claims(&config.issuer().unwrap(), "alice"));
    assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
}
