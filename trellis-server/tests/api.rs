//! End-to-end API tests over the full router.

mod common;

use common::*;
use http::StatusCode;

// ── Tag-governed listing ─────────────────────────────────────────────────

#[tokio::test]
async fn tag_governed_listing_and_lookup() {
    let server = tag_server().await;
    let alice = api_key_for(&server, "alice", false).await;
    let bob = api_key_for(&server, "bob", false).await;

    let create = |id: &str, tag: &str| {
        serde_json::json!({
            "id": id,
            "structure_family": "container",
            "access_blob": {"tags": [tag]},
        })
    };
    let response = send(
        &server.app,
        "POST",
        "/metadata/",
        Some(&alice),
        Some(create("foo", "alice_tag")),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    let response = send(
        &server.app,
        "POST",
        "/metadata/",
        Some(&bob),
        Some(create("bar", "chemists_tag")),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    // Alice sees foo and not bar.
    let listing = send(&server.app, "GET", "/search/", Some(&alice), None).await;
    assert_eq!(listing.status, StatusCode::OK);
    let body = listing.json();
    let keys: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|resource| resource["id"].as_str().unwrap().to_string())
        .collect();
    assert!(keys.contains(&"foo".to_string()));
    assert!(!keys.contains(&"bar".to_string()));

    // Bob sees bar and not foo.
    let listing = send(&server.app, "GET", "/search/", Some(&bob), None).await;
    let body = listing.json();
    let keys: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|resource| resource["id"].as_str().unwrap().to_string())
        .collect();
    assert!(keys.contains(&"bar".to_string()));
    assert!(!keys.contains(&"foo".to_string()));

    // A node Alice cannot read is indistinguishable from a missing one.
    let response = send(&server.app, "GET", "/metadata/bar", Some(&alice), None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let response = send(&server.app, "GET", "/metadata/foo", Some(&alice), None).await;
    assert_eq!(response.status, StatusCode::OK);
}

// ── Array block round-trip ───────────────────────────────────────────────

#[tokio::test]
async fn array_block_round_trip() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;

    let body = array_node_body("arr", &[50, 30], &[vec![20, 20, 10], vec![15, 15]]);
    let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    // PUT block (2, 1): a (10, 15) float64 matrix of ones.
    let ones = f64_bytes(&vec![1.0; 150]);
    let response = send_bytes(
        &server.app,
        "PUT",
        "/array/block/arr?block=2,1",
        &key,
        ones.clone(),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let response = send(&server.app, "GET", "/array/block/arr?block=2,1", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.bytes, ones);

    // Sub-slice of block (0, 0): 2:3,0:5 -> a (1, 5) region.
    let response = send(
        &server.app,
        "GET",
        "/array/block/arr?block=0,0&slice=2:3,0:5",
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.bytes.len(), 5 * 8);

    // A block outside the chunk grid is a 400.
    let response = send(&server.app, "GET", "/array/block/arr?block=3,0", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ── Pagination ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pagination_walks_ten_nodes() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;

    for num in 0..10 {
        let body = serde_json::json!({
            "id": format!("node-{num}"),
            "structure_family": "container",
            "metadata": {"num": num},
        });
        let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let mut uri = "/search/?page[limit]=1".to_string();
    for expected in 0..10 {
        let response = send(&server.app, "GET", &uri, Some(&key), None).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.json();
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["attributes"]["metadata"]["num"], expected);
        match body["links"]["next"].as_str() {
            Some(next) => {
                assert!(expected < 9, "next link past the final page");
                uri = next.to_string();
            }
            None => assert_eq!(expected, 9, "next link missing before exhaustion"),
        }
    }
}

// ── API key scope restriction ────────────────────────────────────────────

#[tokio::test]
async fn api_key_scope_restriction() {
    let server = open_server().await;
    let full = api_key_for(&server, "alice", false).await;
    let body = array_node_body("x", &[4], &[vec![4]]);
    let response = send(&server.app, "POST", "/metadata/", Some(&full), Some(body)).await;
    assert_eq!(response.status, StatusCode::OK);

    let restricted = scoped_api_key(&server, "alice", &["read:metadata"]).await;
    let response = send(&server.app, "GET", "/metadata/x", Some(&restricted), None).await;
    assert_eq!(response.status, StatusCode::OK);
    let response = send(&server.app, "GET", "/array/full/x", Some(&restricted), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

// ── Conditional requests ─────────────────────────────────────────────────

#[tokio::test]
async fn etag_if_none_match_round_trip() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = serde_json::json!({
        "id": "node",
        "structure_family": "container",
        "metadata": {"color": "red"},
    });
    send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;

    let first = send(&server.app, "GET", "/metadata/node", Some(&key), None).await;
    assert_eq!(first.status, StatusCode::OK);
    let etag = first.headers.get("etag").unwrap().to_str().unwrap().to_string();

    let request = http::Request::builder()
        .method("GET")
        .uri("/metadata/node")
        .header("authorization", format!("Apikey {key}"))
        .header("if-none-match", &etag)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.app.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers().get("etag").unwrap().to_str().unwrap(), etag);
}

// ── Revisions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn patch_records_a_revision() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = serde_json::json!({
        "id": "node",
        "structure_family": "container",
        "metadata": {"v": 1, "keep": true},
    });
    send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;

    let response = send(
        &server.app,
        "PATCH",
        "/metadata/node",
        Some(&key),
        Some(serde_json::json!({"metadata": {"v": 2}})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    assert_eq!(response.json()["meta"]["revision"], 1);

    // Merge-patch semantics: untouched keys survive.
    let current = send(&server.app, "GET", "/metadata/node", Some(&key), None).await;
    let metadata = &current.json()["data"]["attributes"]["metadata"];
    assert_eq!(metadata["v"], 2);
    assert_eq!(metadata["keep"], true);

    let revisions = send(&server.app, "GET", "/revisions/node", Some(&key), None).await;
    assert_eq!(revisions.status, StatusCode::OK);
    let body = revisions.json();
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["revision_number"], 1);
    assert_eq!(listed[0]["metadata"]["v"], 1);

    let response = send(
        &server.app,
        "DELETE",
        "/revisions/node?number=1",
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let revisions = send(&server.app, "GET", "/revisions/node", Some(&key), None).await;
    assert!(revisions.json()["data"].as_array().unwrap().is_empty());
}

// ── Slice grammar enforcement ────────────────────────────────────────────

#[tokio::test]
async fn malicious_slices_rejected() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = array_node_body("arr", &[10], &[vec![10]]);
    send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;

    for slice in ["1%2A%2A2", "print(%27x%27)", "1:(2%2B3)"] {
        let response = send(
            &server.app,
            "GET",
            &format!("/array/full/arr?slice={slice}"),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "slice {slice}");
    }
    let response = send(&server.app, "GET", "/array/full/arr?slice=0:5", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.bytes.len(), 5 * 8);
}

// ── Response size guard ──────────────────────────────────────────────────

#[tokio::test]
async fn response_size_guard() {
    let mut settings = trellis_server::Settings::default();
    settings.response_bytesize_limit = 64;
    let server = server_with(
        std::sync::Arc::new(trellis_security::OpenAccessPolicy),
        settings,
    )
    .await;
    let key = api_key_for(&server, "alice", false).await;
    let body = array_node_body("big", &[100], &[vec![100]]);
    send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;

    let response = send(&server.app, "GET", "/array/full/big", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["detail"]
        .as_str()
        .unwrap()
        .contains("narrower slice"));

    // A narrow slice fits under the limit.
    let response = send(&server.app, "GET", "/array/full/big?slice=0:4", Some(&key), None).await;
    assert_eq!(response.status, StatusCode::OK);
}

// ── Inlined contents ─────────────────────────────────────────────────────

#[tokio::test]
async fn small_containers_inline_their_children() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    send(
        &server.app,
        "POST",
        "/metadata/",
        Some(&key),
        Some(serde_json::json!({"id": "wide", "structure_family": "container"})),
    )
    .await;
    for n in 0..3 {
        send(
            &server.app,
            "POST",
            "/metadata/wide",
            Some(&key),
            Some(serde_json::json!({
                "id": format!("c{n}"),
                "structure_family": "container",
                "metadata": {"n": n},
            })),
        )
        .await;
    }

    // Without the opt-in, no contents are embedded.
    let plain = send(&server.app, "GET", "/metadata/wide", Some(&key), None).await;
    assert!(plain.json()["data"]["attributes"]["contents"].is_null());

    let inlined = send(&server.app, "GET", "/metadata/wide?inline=1", Some(&key), None).await;
    let body = inlined.json();
    let contents = &body["data"]["attributes"]["contents"];
    assert_eq!(contents.as_object().unwrap().len(), 3);
    assert_eq!(contents["c1"]["attributes"]["metadata"]["n"], 1);
    assert_eq!(body["data"]["attributes"]["count"], 3);
}

// ── Duplicate keys conflict ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_key_is_conflict() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = serde_json::json!({"id": "dup", "structure_family": "container"});
    let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body.clone())).await;
    assert_eq!(response.status, StatusCode::OK);
    let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

// ── Composite namespace invariant ────────────────────────────────────────

#[tokio::test]
async fn composite_flat_namespace_enforced() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    send(
        &server.app,
        "POST",
        "/metadata/",
        Some(&key),
        Some(serde_json::json!({"id": "comp", "structure_family": "composite"})),
    )
    .await;

    // A member table claims the columns "x" and "y".
    let table = serde_json::json!({
        "id": "t1",
        "structure_family": "table",
        "structure": {
            "family": "table",
            "columns": [
                {"name": "x", "data_type": "float64"},
                {"name": "y", "data_type": "float64"},
            ],
            "npartitions": 1,
        },
        "data_sources": [{
            "mimetype": "application/x-trellis-table",
            "structure": {
                "family": "table",
                "columns": [
                    {"name": "x", "data_type": "float64"},
                    {"name": "y", "data_type": "float64"},
                ],
                "npartitions": 1,
            },
            "management": "writable",
            "assets": [],
        }],
    });
    let response = send(&server.app, "POST", "/metadata/comp", Some(&key), Some(table)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    // A sibling keyed like an existing column collides.
    let clash = array_node_body("x", &[2], &[vec![2]]);
    let response = send(&server.app, "POST", "/metadata/comp", Some(&key), Some(clash)).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    // Nested containers are not allowed inside composites.
    let nested = serde_json::json!({"id": "inner", "structure_family": "container"});
    let response = send(&server.app, "POST", "/metadata/comp", Some(&key), Some(nested)).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ── Device-code flow ─────────────────────────────────────────────────────

#[tokio::test]
async fn device_code_flow() {
    let server = open_server().await;

    let response = send(
        &server.app,
        "POST",
        "/auth/provider/toy/authorize",
        None,
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    let grant = response.json();
    let user_code = grant["user_code"].as_str().unwrap().to_string();
    let device_code = grant["device_code"].as_str().unwrap().to_string();
    assert_eq!(user_code.len(), 9); // "ABCD-EFGH"

    // Polling before the operator completes: authorization_pending.
    let poll = serde_json::json!({"device_code": device_code});
    let response = send(
        &server.app,
        "POST",
        "/auth/provider/toy/token",
        None,
        Some(poll.clone()),
    )
    .await;
    assert_eq!(response.json()["error"], "authorization_pending");

    // The operator submits the user code plus credentials.
    let response = send(
        &server.app,
        "POST",
        "/auth/provider/toy/device_code",
        None,
        Some(serde_json::json!({
            "user_code": user_code,
            "username": "alice",
            "password": "secret1",
        })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    // The next poll returns tokens.
    let response = send(&server.app, "POST", "/auth/provider/toy/token", None, Some(poll)).await;
    let body = response.json();
    assert!(body["access_token"].as_str().is_some(), "{body:?}");
    assert!(body["refresh_token"].as_str().is_some());

    // The access token authenticates.
    let request = http::Request::builder()
        .method("GET")
        .uri("/auth/whoami")
        .header(
            "authorization",
            format!("Bearer {}", body["access_token"].as_str().unwrap()),
        )
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.app.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── Session lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn password_grant_refresh_and_revoke() {
    let server = open_server().await;
    let response = send(
        &server.app,
        "POST",
        "/auth/provider/toy/token",
        None,
        Some(serde_json::json!({"username": "alice", "password": "secret1"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
    let tokens = response.json();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = send(
        &server.app,
        "POST",
        "/auth/session/refresh",
        None,
        Some(serde_json::json!({"refresh_token": refresh_token})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    // Bad credentials are a 401.
    let response = send(
        &server.app,
        "POST",
        "/auth/provider/toy/token",
        None,
        Some(serde_json::json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Revoke the session, then refresh fails and re-revoking conflicts.
    let key = api_key_for(&server, "alice", false).await;
    let principal = server
        .state
        .authn
        .principal_for_identity("toy", "alice")
        .await
        .unwrap();
    let session_uuid = principal.sessions[0].uuid;
    let response = send(
        &server.app,
        "DELETE",
        &format!("/auth/session/revoke/{session_uuid}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let response = send(
        &server.app,
        "DELETE",
        &format!("/auth/session/revoke/{session_uuid}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    let response = send(
        &server.app,
        "POST",
        "/auth/session/refresh",
        None,
        Some(serde_json::json!({"refresh_token": refresh_token})),
    )
    .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

// ── Table round-trip ─────────────────────────────────────────────────────

#[tokio::test]
async fn table_write_read_append() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = serde_json::json!({
        "id": "tbl",
        "structure_family": "table",
        "structure": {
            "family": "table",
            "columns": [
                {"name": "num", "data_type": "int64"},
                {"name": "name", "data_type": "utf8"},
            ],
            "npartitions": 1,
        },
        "data_sources": [{
            "mimetype": "application/x-trellis-table",
            "structure": {
                "family": "table",
                "columns": [
                    {"name": "num", "data_type": "int64"},
                    {"name": "name", "data_type": "utf8"},
                ],
                "npartitions": 1,
            },
            "management": "writable",
            "assets": [],
        }],
    });
    let response = send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let rows = serde_json::json!({"columns": {"num": [1, 2], "name": ["a", "b"]}});
    let response = send(&server.app, "PUT", "/table/full/tbl", Some(&key), Some(rows)).await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    // PATCH appends to the partition.
    let more = serde_json::json!({"columns": {"num": [3], "name": ["c"]}});
    let response = send(
        &server.app,
        "PATCH",
        "/table/partition/tbl?partition=0",
        Some(&key),
        Some(more),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());

    let response = send(
        &server.app,
        "GET",
        "/table/full/tbl?format=csv&column=num",
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let text = String::from_utf8(response.bytes.to_vec()).unwrap();
    assert_eq!(text, "num\n1\n2\n3\n");

    // JSON rows via content negotiation.
    let response = send(&server.app, "GET", "/table/full/tbl?format=json", Some(&key), None).await;
    let rows = response.json();
    assert_eq!(rows.as_array().unwrap().len(), 3);
    assert_eq!(rows[2]["name"], "c");
}

// ── Content negotiation failures ─────────────────────────────────────────

#[tokio::test]
async fn unknown_format_is_not_acceptable() {
    let server = open_server().await;
    let key = api_key_for(&server, "alice", false).await;
    let body = array_node_body("arr", &[4], &[vec![4]]);
    send(&server.app, "POST", "/metadata/", Some(&key), Some(body)).await;

    let response = send(
        &server.app,
        "GET",
        "/array/full/arr?format=application/x-hdf5",
        Some(&key),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
    let body = response.json();
    assert!(body["supported_formats"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "application/octet-stream"));
}
