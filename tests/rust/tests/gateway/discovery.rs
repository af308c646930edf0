//! Unauthenticated discovery endpoints

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tests::{TestGateway, TestIdentityProvider, TestNightscout};

#[tokio::test]
async fn test_health() {
    let idp = TestIdentityProvider::start().await;
    let ns = TestNightscout::start().await;
    let gateway = TestGateway::start(&idp, &ns).await;

    let body: Value = gateway
        .http
        .get(format!("{}/health", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_authorization_server_metadata() {
    let idp = TestIdentityProvider::start().await;
    let ns = TestNightscout::start().await;
    let gateway = TestGateway::start(&idp, &ns).await;

    let body: Value = gateway
        .http
        .get(format!("{}/.well-known/oauth-authorization-server", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({
            "issuer": idp.issuer(),
            "authorization_endpoint": "https://auth.nightscout-mcp.test/oauth2/authorize",
            "token_endpoint": "https://auth.nightscout-mcp.test/oauth2/token",
            "userinfo_endpoint": "https://auth.nightscout-mcp.test/oauth2/userInfo",
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "scopes_supported": ["openid", "email", "profile"],
            "code_challenge_methods_supported": ["S256"]
        })
    );
}

#[tokio::test]
async fn test_protected_resource_metadata() {
    let idp = TestIdentityProvider::start().await;
    let ns = TestNightscout::start().await;
    let gateway = TestGateway::start(&idp, &ns).await;

    for path in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let body: Value = gateway
            .http
            .get(format!("{}{}", gateway.base_url, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["resource"], gateway.mcp_url());
        assert_eq!(body["authorization_servers"], json!([idp.issuer()]));
        assert_eq!(body["resource_name"], "Nightscout MCP Server");
    }
}

#[tokio::test]
async fn test_cors_exposes_session_header() {
    let idp = TestIdentityProvider::start().await;
    let ns = TestNightscout::start().await;
    let gateway = TestGateway::start(&idp, &ns).await;

    let response = gateway
        .initialize_with(Some(&format!("Bearer {}", idp.token("alice"))))
        .await;
    let response_headers = response.headers().clone();
    assert_eq!(response.status(), 200);

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("origin", "https://claude.example")
        .header("accept", tests::MCP_ACCEPT)
        .header("authorization", format!("Bearer {}", idp.token("alice")))
        .json(&tests::initialize_request())
        .send()
        .await
        .unwrap();
    let exposed = response
        .headers()
        .get("access-control-expose-headers")
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("mcp-session-id"));
    assert!(response_headers.contains_key("mcp-session-id"));
}
