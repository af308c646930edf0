//! Shared test utilities and fixtures for gateway integration tests.

use std::sync::Arc;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use nightscout_core::{CognitoConfig, NightscoutSite, StaticUserDirectory};
use nightscout_gateway::{
    GatewayConfig, GatewayServer, IssuerKeyCache, NightscoutSites, OperationRegistry,
    SessionRegistry, TokenVerifier, SESSION_HEADER,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Key material served as the issuer's JWKS
pub mod keys;

pub const TEST_CLIENT_ID: &str = "test-app-client";

/// Accept header every Streamable HTTP POST must carry
pub const MCP_ACCEPT: &str = "application/json, text/event-stream";

/// Path of the user pool under the identity provider mock
pub const POOL_PATH: &str = "/eu-west-1_TestPool";

/// Token minting
pub mod tokens {
    use super::*;

    pub fn sign_with(pem: &str, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(String::from);
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("test key parses");
        encode(&header, claims, &key).expect("test token signs")
    }

    pub fn sign(claims: &Value) -> String {
        sign_with(keys::TEST_PRIVATE_KEY_PEM, Some(keys::TEST_KID), claims)
    }

    /// Cognito-style access token claims for `username`
    pub fn access_claims(issuer: &str, username: &str) -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "sub": format!("sub-{}", username),
            "iss": issuer,
            "token_use": "access",
            "client_id": TEST_CLIENT_ID,
            "scope": "openid profile email",
            "username": username,
            "iat": now,
            "exp": now + 3600
        })
    }

    pub fn access_token(issuer: &str, username: &str) -> String {
        sign(&access_claims(issuer, username))
    }
}

/// Mock user pool publishing the test JWKS
pub struct TestIdentityProvider {
    pub server: MockServer,
}

impl TestIdentityProvider {
    pub async fn start() -> Self {
        Self::start_expecting(None).await
    }

    /// Like [`start`](Self::start), asserting the JWKS is fetched exactly `fetches` times
    pub async fn start_expecting(fetches: Option<u64>) -> Self {
        let server = MockServer::start().await;
        let mock = Mock::given(method("GET"))
            .and(path(format!("{}/.well-known/jwks.json", POOL_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(keys::jwks_json()));
        let mock = match fetches {
            Some(n) => mock.expect(n),
            None => mock,
        };
        mock.mount(&server).await;
        Self { server }
    }

    pub fn issuer(&self) -> String {
        format!("{}{}", self.server.uri(), POOL_PATH)
    }

    pub fn config(&self) -> CognitoConfig {
        CognitoConfig {
            app_client_id: Some(TEST_CLIENT_ID.to_string()),
            domain: Some("auth.nightscout-mcp.test".to_string()),
            issuer_override: Some(self.issuer()),
            ..Default::default()
        }
    }

    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.config(), Arc::new(IssuerKeyCache::new()))
    }

    pub fn token(&self, username: &str) -> String {
        tokens::access_token(&self.issuer(), username)
    }
}

/// Mock Nightscout hosting one site per user under `/<username>`
pub struct TestNightscout {
    pub server: MockServer,
}

impl TestNightscout {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn site_url(&self, username: &str) -> String {
        format!("{}/{}", self.server.uri(), username)
    }

    /// Directory mapping `alice` and `bob` to their sites
    pub fn directory(&self) -> StaticUserDirectory {
        StaticUserDirectory::new()
            .with_user(
                "alice",
                NightscoutSite::new(self.site_url("alice"), "alice-token"),
            )
            .with_user("bob", NightscoutSite::new(self.site_url("bob"), "bob-token"))
    }

    /// Accept the site token of `username` and hand out `jwt-<username>`
    pub async fn mount_authorization(&self, username: &str) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/{}/api/v2/authorization/request/{}-token",
                username, username
            )))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "token": format!("jwt-{}", username) })),
            )
            .mount(&self.server)
            .await;
    }

    /// Entries endpoint for `username` returning `sgvs` as consecutive readings
    pub async fn mount_entries(&self, username: &str, sgvs: &[u32]) {
        let start = 1_700_000_000_000_i64;
        let entries: Vec<Value> = sgvs
            .iter()
            .enumerate()
            .map(|(i, sgv)| json!({"sgv": sgv, "date": start + i as i64 * 300_000}))
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("/{}/api/v1/entries.json", username)))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(entries)))
            .mount(&self.server)
            .await;
    }
}

/// Gateway listening on a random local port
pub struct TestGateway {
    pub base_url: String,
    pub registry: Arc<SessionRegistry>,
    pub http: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestGateway {
    pub async fn start(idp: &TestIdentityProvider, nightscout: &TestNightscout) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            enable_cors: true,
            public_url: Some(base_url.clone()),
        };
        let sites = Arc::new(NightscoutSites::new(Arc::new(nightscout.directory())));
        let server = GatewayServer::new(
            config,
            Arc::new(idp.verifier()),
            Arc::new(OperationRegistry::nightscout(sites)),
        );
        let registry = server.registry();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            server
                .serve(listener, async move { signal.cancelled().await })
                .await
                .expect("gateway serves");
        });

        Self {
            base_url,
            registry,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// POST an initialize request, with `authorization` as the raw header value
    pub async fn initialize_with(&self, authorization: Option<&str>) -> reqwest::Response {
        let mut request = self
            .http
            .post(self.mcp_url())
            .header("accept", MCP_ACCEPT)
            .json(&initialize_request());
        if let Some(value) = authorization {
            request = request.header("authorization", value);
        }
        request.send().await.expect("initialize request")
    }

    /// Complete the handshake with `token` and return the session id
    pub async fn open_session(&self, token: &str) -> String {
        let response = self
            .initialize_with(Some(&format!("Bearer {}", token)))
            .await;
        assert_eq!(response.status(), 200, "initialize failed");
        let id = response
            .headers()
            .get(SESSION_HEADER)
            .expect("session id header")
            .to_str()
            .expect("ascii session id")
            .to_string();

        self.notify(&id, "notifications/initialized").await;
        id
    }

    pub async fn notify(&self, session: &str, method: &str) -> reqwest::Response {
        self.http
            .post(self.mcp_url())
            .header(SESSION_HEADER, session)
            .header("accept", MCP_ACCEPT)
            .json(&json!({"jsonrpc": "2.0", "method": method}))
            .send()
            .await
            .expect("notification request")
    }

    /// Request on a session; answers arrive as an SSE body
    pub async fn post(&self, session: &str, body: Value) -> reqwest::Response {
        self.http
            .post(self.mcp_url())
            .header(SESSION_HEADER, session)
            .header("accept", MCP_ACCEPT)
            .json(&body)
            .send()
            .await
            .expect("mcp request")
    }

    /// JSON-RPC call returning the parsed response envelope
    pub async fn call(&self, session: &str, id: i64, method: &str, params: Value) -> Value {
        let response = self
            .post(
                session,
                json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body = response.text().await.expect("sse body");
        sse_messages(&body)
            .into_iter()
            .find(|message| message["id"] == json!(id))
            .expect("json-rpc response on the stream")
    }

    pub async fn delete(&self, session: &str) -> reqwest::Response {
        self.http
            .delete(self.mcp_url())
            .header(SESSION_HEADER, session)
            .send()
            .await
            .expect("delete request")
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "integration-test", "version": "1.0.0"}
        }
    })
}

/// JSON payloads of the `data:` lines of an SSE body.
///
/// Priming events carry no JSON and are skipped.
pub fn sse_messages(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}
