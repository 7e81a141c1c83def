//! Test harness: a full app over an in-memory catalog, authn store,
//! and the in-process streaming datastore.

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use trellis_catalog::CatalogStore;
use trellis_core::media::SerializationRegistry;
use trellis_core::validation::ValidationRegistry;
use trellis_query::QueryRegistry;
use trellis_security::{
    AccessPolicy, ApiKeyParams, AuthnStore, OpenAccessPolicy, TagBasedPolicy, TagTable,
    TokenConfig, ToyPasswordProvider,
};
use trellis_server::{build_app, AppState, ServerState, Settings};
use trellis_stream::MemoryStreamingDatastore;

pub struct TestServer {
    pub app: Router,
    pub state: AppState,
    _data_dir: tempfile::TempDir,
}

pub async fn server_with(policy: Arc<dyn AccessPolicy>, settings: Settings) -> TestServer {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let catalog = CatalogStore::in_memory(data_dir.path()).await.expect("catalog");
    let authn = AuthnStore::in_memory().await.expect("authn");

    let provider: Arc<dyn trellis_security::AuthProvider> = Arc::new(
        ToyPasswordProvider::new("toy")
            .with_user("alice", "secret1")
            .expect("hash")
            .with_user("bob", "secret2")
            .expect("hash")
            .with_user("sue", "secret3")
            .expect("hash"),
    );

    let state = AppState(Arc::new(ServerState {
        catalog,
        authn,
        policy,
        stream: Arc::new(MemoryStreamingDatastore::default()),
        serialization: SerializationRegistry::default(),
        queries: QueryRegistry::default(),
        validation: ValidationRegistry::new(),
        tokens: TokenConfig::new(vec!["test-secret".to_string()]),
        providers: vec![provider],
        settings,
    }));
    TestServer {
        app: build_app(state.clone()),
        state,
        _data_dir: data_dir,
    }
}

pub async fn open_server() -> TestServer {
    server_with(Arc::new(OpenAccessPolicy), Settings::default()).await
}

pub fn tag_table() -> TagTable {
    TagTable::from_json(&serde_json::json!({
        "tags": {
            "alice_tag": {
                "owners": ["alice"],
                "members": {
                    "alice": ["read:metadata", "read:data", "write:metadata",
                              "write:data", "create:node", "delete:node"]
                }
            },
            "chemists_tag": {
                "owners": ["bob"],
                "members": {
                    "bob": ["read:metadata", "read:data", "write:metadata",
                            "write:data", "create:node", "delete:node"],
                    "sue": ["read:metadata", "read:data"]
                }
            }
        }
    }))
    .expect("tag table")
}

pub async fn tag_server() -> TestServer {
    server_with(
        Arc::new(TagBasedPolicy::new("toy", tag_table())),
        Settings::default(),
    )
    .await
}

/// Create (or fetch) a principal for `user` and mint an inheriting API
/// key. `admin` also grants the admin role.
pub async fn api_key_for(server: &TestServer, user: &str, admin: bool) -> String {
    let principal = server
        .state
        .authn
        .principal_for_identity("toy", user)
        .await
        .expect("principal");
    if admin {
        server
            .state
            .authn
            .grant_role(&principal.uuid, "admin")
            .await
            .expect("grant admin");
    }
    let (secret, _) = server
        .state
        .authn
        .create_api_key(&principal.uuid, &ApiKeyParams::default())
        .await
        .expect("api key");
    secret
}

/// Mint a key with an explicit scope list.
pub async fn scoped_api_key(server: &TestServer, user: &str, scopes: &[&str]) -> String {
    let principal = server
        .state
        .authn
        .principal_for_identity("toy", user)
        .await
        .expect("principal");
    let params = ApiKeyParams {
        scopes: Some(scopes.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    };
    let (secret, _) = server
        .state
        .authn
        .create_api_key(&principal.uuid, &params)
        .await
        .expect("api key");
    secret
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.bytes).expect("JSON body")
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<serde_json::Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("authorization", format!("Apikey {key}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    TestResponse {
        status,
        headers,
        bytes,
    }
}

pub async fn send_bytes(
    app: &Router,
    method: &str,
    uri: &str,
    api_key: &str,
    body: bytes::Bytes,
) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Apikey {api_key}"))
        .header("content-type", "application/octet-stream")
        .body(Body::from(body))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    TestResponse {
        status,
        headers,
        bytes,
    }
}

/// Body for creating a writable float64 array node.
pub fn array_node_body(id: &str, shape: &[u64], chunks: &[Vec<u64>]) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "structure_family": "array",
        "structure": {
            "family": "array",
            "data_type": {"kind": "float", "item_size": 8},
            "shape": shape,
            "chunks": chunks,
        },
        "data_sources": [{
            "mimetype": "application/x-trellis-array",
            "structure": {
                "family": "array",
                "data_type": {"kind": "float", "item_size": 8},
                "shape": shape,
                "chunks": chunks,
            },
            "management": "writable",
            "assets": [],
        }],
    })
}

pub fn f64_bytes(values: &[f64]) -> bytes::Bytes {
    let mut out = Vec::with_capacity(values.len() * 8);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    bytes::Bytes::from(out)
}
