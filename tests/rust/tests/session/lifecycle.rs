//! Creation, routing and termination of sessions

use std::collections::HashSet;
use std::time::Duration;

use nightscout_gateway::SESSION_HEADER;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tests::tokens::{access_claims, sign};
use tests::{sse_messages, TestGateway, TestIdentityProvider, TestNightscout, MCP_ACCEPT};

async fn setup() -> (TestIdentityProvider, TestNightscout, TestGateway) {
    let idp = TestIdentityProvider::start().await;
    let nightscout = TestNightscout::start().await;
    let gateway = TestGateway::start(&idp, &nightscout).await;
    (idp, nightscout, gateway)
}

#[tokio::test]
async fn test_initialize_creates_registered_session() {
    let (idp, _ns, gateway) = setup().await;

    let response = gateway
        .initialize_with(Some(&format!("Bearer {}", idp.token("alice"))))
        .await;
    assert_eq!(response.status(), 200);

    let id = response
        .headers()
        .get(SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let messages = sse_messages(&response.text().await.unwrap());
    let body = &messages[0];
    assert_eq!(body["id"], 0);
    assert_eq!(body["result"]["serverInfo"]["name"], "nightscout-mcp-server");
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    let session = gateway.registry.get(&id).expect("session registered");
    assert_eq!(session.identity().username, "alice");
    assert_eq!(gateway.registry.len(), 1);
}

#[tokio::test]
async fn test_session_ids_are_unique() {
    let (idp, _ns, gateway) = setup().await;
    let token = idp.token("alice");

    let mut ids = HashSet::new();
    for _ in 0..10 {
        assert!(ids.insert(gateway.open_session(&token).await));
    }
    assert_eq!(gateway.registry.len(), 10);
}

#[tokio::test]
async fn test_concurrent_initializations_bind_distinct_identities() {
    let (idp, _ns, gateway) = setup().await;
    let (alice, bob) = (idp.token("alice"), idp.token("bob"));

    let (s1, s2) = tokio::join!(gateway.open_session(&alice), gateway.open_session(&bob));

    assert_ne!(s1, s2);
    assert_eq!(gateway.registry.get(&s1).unwrap().identity().username, "alice");
    assert_eq!(gateway.registry.get(&s2).unwrap().identity().username, "bob");
}

#[tokio::test]
async fn test_unknown_session_rejected_without_side_effects() {
    let (idp, _ns, gateway) = setup().await;
    gateway.open_session(&idp.token("alice")).await;

    let response = gateway
        .post(
            "S1-never-issued",
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "Bad Request: No valid session ID provided"},
            "id": null
        })
    );
    assert_eq!(gateway.registry.len(), 1);
    assert!(!gateway.registry.contains("S1-never-issued"));
}

#[tokio::test]
async fn test_unknown_session_with_initialize_body_is_not_a_new_session() {
    let (idp, _ns, gateway) = setup().await;

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header(SESSION_HEADER, "stale-session")
        .header("accept", MCP_ACCEPT)
        .header("authorization", format!("Bearer {}", idp.token("alice")))
        .json(&tests::initialize_request())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_request_without_session_rejected() {
    let (_idp, _ns, gateway) = setup().await;

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("accept", MCP_ACCEPT)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_missing_and_malformed_authorization_rejected() {
    let (_idp, _ns, gateway) = setup().await;

    for header in [None, Some("Basic YWxpY2U6c2VjcmV0"), Some("Bearer"), Some("Bearer not.a.jwt")] {
        let response = gateway.initialize_with(header).await;
        assert_eq!(response.status(), 401, "authorization {:?}", header);

        let challenge = response
            .headers()
            .get("www-authenticate")
            .expect("bearer challenge")
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.starts_with("Bearer error=\"invalid_token\""));
        assert!(challenge.contains(&format!(
            "resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
            gateway.base_url
        )));

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], -32001);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Unauthorized: "));
        assert_eq!(body["id"], Value::Null);
    }

    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_id_token_rejected_at_initialize() {
    let (idp, _ns, gateway) = setup().await;

    let mut claims = access_claims(&idp.issuer(), "alice");
    claims["token_use"] = json!("id");
    let response = gateway
        .initialize_with(Some(&format!("Bearer {}", sign(&claims))))
        .await;

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["data"]["error"], "wrong_token_type");
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_batched_initialize_rejected() {
    let (idp, _ns, gateway) = setup().await;

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("accept", MCP_ACCEPT)
        .header("authorization", format!("Bearer {}", idp.token("alice")))
        .json(&json!([tests::initialize_request()]))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_body_errors() {
    let (_idp, _ns, gateway) = setup().await;

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("content-type", "application/json")
        .header("accept", MCP_ACCEPT)
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("content-type", "text/plain")
        .header("accept", MCP_ACCEPT)
        .body(tests::initialize_request().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);

    // Answers are streamed, so the client must accept SSE too
    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("accept", "application/json")
        .json(&tests::initialize_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 406);
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;
    let session = gateway.registry.get(&id).unwrap();

    assert_eq!(gateway.delete(&id).await.status(), 200);
    assert!(!gateway.registry.contains(&id));
    assert!(session.is_closed());
    assert!(session.cancellation_token().is_cancelled());

    // The id no longer resolves
    let again = gateway.delete(&id).await;
    assert_eq!(again.status(), 400);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid or missing session ID");

    // A direct second close is a no-op
    assert!(!session.close(nightscout_gateway::CloseReason::ClientTerminated));
    assert!(gateway.registry.is_empty());

    let response = gateway
        .post(&id, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_continuation_needs_no_token() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;

    let ping = gateway.call(&id, 1, "ping", json!({})).await;
    assert_eq!(ping["result"], json!({}));
}

#[tokio::test]
async fn test_notification_only_body_is_accepted() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;

    let response = gateway.notify(&id, "notifications/cancelled").await;
    assert_eq!(response.status(), 202);
}

#[tokio::test]
async fn test_batch_on_existing_session_rejected() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;

    let response = gateway
        .post(
            &id,
            json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                {"jsonrpc": "2.0", "id": 2, "method": "prompts/list"}
            ]),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["message"], "Batch requests are not supported");

    // The session survives the rejected body
    let prompts = gateway.call(&id, 3, "prompts/list", json!({})).await;
    assert_eq!(prompts["result"]["prompts"][0]["name"], "estimate-carbs");
}

#[tokio::test]
async fn test_null_id_is_rejected_not_treated_as_notification() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;

    let response = gateway
        .post(
            &id,
            json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"}),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_unknown_methods() {
    let (idp, _ns, gateway) = setup().await;
    let id = gateway.open_session(&idp.token("alice")).await;

    let resources = gateway.call(&id, 1, "resources/list", json!({})).await;
    assert_eq!(resources["error"]["code"], -32601);

    let custom = gateway.call(&id, 2, "glucose/predict", json!({})).await;
    assert_eq!(custom["error"]["code"], -32601);
}

#[tokio::test]
async fn test_unknown_protocol_version_answered_with_ours() {
    let (idp, _ns, gateway) = setup().await;

    let mut request = tests::initialize_request();
    request["params"]["protocolVersion"] = json!("2020-01-01");
    let response = gateway
        .http
        .post(gateway.mcp_url())
        .header("accept", MCP_ACCEPT)
        .header("authorization", format!("Bearer {}", idp.token("alice")))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let messages = sse_messages(&response.text().await.unwrap());
    assert_eq!(messages[0]["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(gateway.registry.len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_all_sessions() {
    let (idp, _ns, gateway) = setup().await;
    let first = gateway.open_session(&idp.token("alice")).await;
    gateway.open_session(&idp.token("bob")).await;
    let session = gateway.registry.get(&first).unwrap();

    gateway.stop();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !gateway.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions closed on shutdown");

    assert!(session.is_closed());
}
