use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use chroma_gateway::{
    api::{self, API_TOKEN_HEADER, AppState},
    config::Config,
    processing::{DocumentReader, Fetcher, StoreManager},
};
use httpmock::{
    Method::{DELETE, GET, POST},
    MockServer,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "integration-token";

struct Gateway {
    app: Router,
    dir: TempDir,
}

fn gateway(server: &MockServer) -> Gateway {
    let dir = TempDir::new().expect("tempdir");
    let address = server.address();
    let config = Config {
        chroma_host: address.ip().to_string(),
        chroma_port: address.port(),
        openai_api_key: Some("sk-test".into()),
        openai_base_url: server.base_url(),
        api_token: Some(TOKEN.into()),
        allowed_dirs: vec![dir.path().to_path_buf()],
        fetch_timeout: Duration::from_secs(5),
        max_workers: 2,
        error_log_path: dir.path().join("error.txt"),
        ..Config::default()
    };
    let store = Arc::new(StoreManager::new(&config).expect("store manager"));
    let reader = Arc::new(DocumentReader::new(
        Fetcher::new(&config).expect("fetcher"),
    ));
    Gateway {
        app: api::create_router(AppState::new(store, reader, &config)),
        dir,
    }
}

impl Gateway {
    async fn call(&self, payload: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api")
            .header("content-type", "application/json")
            .header(API_TOKEN_HEADER, TOKEN)
            .body(Body::from(payload.to_string()))
            .expect("request");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    async fn health(&self) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, serde_json::from_slice(&body).expect("json body"))
    }
}

fn embeddings(count: usize) -> Value {
    let data: Vec<Value> = (0..count)
        .map(|index| json!({"object": "embedding", "index": index, "embedding": [index as f32, 0.5, 0.25]}))
        .collect();
    json!({"object": "list", "data": data, "model": "text-embedding-3-large"})
}

async fn mock_collection(server: &MockServer, name: &str, id: &str) {
    let collection = json!({"id": id, "name": name, "metadata": {"hnsw:space": "cosine"}});
    let path = format!("/api/v1/collections/{name}");
    server
        .mock_async({
            let collection = collection.clone();
            move |when, then| {
                when.method(GET).path(path);
                then.status(200).json_body(collection);
            }
        })
        .await;
    server
        .mock_async(move |when, then| {
            when.method(POST).path("/api/v1/collections");
            then.status(200).json_body(collection);
        })
        .await;
}

#[tokio::test]
async fn upsert_json_questions_are_embedded_and_stored_separately() {
    let server = MockServer::start_async().await;
    mock_collection(&server, "faq", "col-faq").await;
    let embed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model":"text-embedding-3-large","input":["a","b"]}"#);
            then.status(200).json_body(embeddings(2));
        })
        .await;
    let add = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/col-faq/add")
                .json_body_partial(
                    r#"{"documents":["a","b"],"metadatas":[{"source":"api"},{"k":"v","source":"api"}]}"#,
                );
            then.status(201).json_body(json!(true));
        })
        .await;

    let gateway = gateway(&server);
    let (status, body) = gateway
        .call(json!({
            "action": "upsert_json",
            "collection_name": "faq",
            "separate_chunks": true,
            "json_data": {"questions": [{"text": "a"}, {"text": "b", "metadata": {"k": "v"}}]}
        }))
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["added"], 2);
    assert_eq!(body["model_used"], "text-embedding-3-large");
    assert_eq!(body["ids"].as_array().map(Vec::len), Some(2));
    embed.assert_async().await;
    add.assert_async().await;
}

#[tokio::test]
async fn upsert_csv_file_stores_one_document_per_row() {
    let server = MockServer::start_async().await;
    mock_collection(&server, "people", "col-people").await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(embeddings(2));
        })
        .await;
    let add = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/col-people/add")
                .json_body_partial(
                    r#"{"documents":["name: Ada\ncity: London","name: Grace\ncity: Arlington"],"metadatas":[{"source":"people.csv"},{"source":"people.csv"}]}"#,
                );
            then.status(201).json_body(json!(true));
        })
        .await;

    let gateway = gateway(&server);
    let path = gateway.dir.path().join("people.csv");
    std::fs::write(&path, "name,city\nAda,London\nGrace,Arlington\n").expect("write csv");

    let (status, body) = gateway
        .call(json!({
            "action": "upsert",
            "file_name": path.to_string_lossy(),
            "collection_name": "people",
            "metadata": {"source": "people.csv"}
        }))
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["added"], 2);
    add.assert_async().await;
}

#[tokio::test]
async fn upsert_outside_allow_list_is_logged_and_rejected() {
    let server = MockServer::start_async().await;
    let gateway = gateway(&server);

    let (status, body) = gateway
        .call(json!({
            "action": "upsert",
            "file_name": "/etc/passwd.txt",
            "collection_name": "demo"
        }))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Access to path not allowed: /etc/passwd.txt");
    let log = std::fs::read_to_string(gateway.dir.path().join("error.txt")).expect("error log");
    assert!(log.contains("{\"error\":\"Access to path not allowed: /etc/passwd.txt\"}"));
}

#[tokio::test]
async fn count_on_empty_collection_returns_zero() {
    let server = MockServer::start_async().await;
    mock_collection(&server, "empty", "col-empty").await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/collections/col-empty/count");
            then.status(200).json_body(json!(0));
        })
        .await;

    let (status, body) = gateway(&server)
        .call(json!({"action": "count", "collection_name": "empty"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "count": 0}));
}

#[tokio::test]
async fn malformed_collection_names_are_rejected_before_chroma() {
    let server = MockServer::start_async().await;
    let chroma = server
        .mock_async(|when, then| {
            when.path_contains("/api/v1");
            then.status(200).json_body(json!({"id": "col-x", "name": "x"}));
        })
        .await;
    let gateway = gateway(&server);

    for name in ["a?x=1", "..", "../admin"] {
        let (status, body) = gateway
            .call(json!({"action": "count", "collection_name": name}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{name}: {body}");
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|message| message.contains("Invalid collection name")),
            "{body}"
        );
    }
    let (status, _) = gateway
        .call(json!({"action": "delete_collection", "collection_name": "a/b"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    chroma.assert_hits_async(0).await;
}

#[tokio::test]
async fn delete_file_with_no_matches_deletes_nothing() {
    let server = MockServer::start_async().await;
    mock_collection(&server, "docs", "col-docs").await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/col-docs/get")
                .json_body_partial(r#"{"where":{"source":"missing.txt"}}"#);
            then.status(200).json_body(json!({"ids": []}));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/collections/col-docs/delete");
            then.status(200).json_body(json!([]));
        })
        .await;

    let (status, body) = gateway(&server)
        .call(json!({
            "action": "delete_file",
            "collection_name": "docs",
            "filters": {"where": {"source": "missing.txt"}}
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "deleted": 0, "ids": []}));
    delete.assert_hits_async(0).await;
}

#[tokio::test]
async fn delete_collection_drops_by_name() {
    let server = MockServer::start_async().await;
    let drop = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/v1/collections/archive");
            then.status(200).json_body(json!(null));
        })
        .await;

    let (status, body) = gateway(&server)
        .call(json!({"action": "delete_collection", "collection_name": "archive"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Collection archive deleted");
    drop.assert_async().await;
}

#[tokio::test]
async fn query_returns_matches_in_distance_order() {
    let server = MockServer::start_async().await;
    mock_collection(&server, "docs", "col-docs").await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .json_body_partial(r#"{"model":"text-embedding-3-small","input":["what is rust?"]}"#);
            then.status(200).json_body(embeddings(1));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/col-docs/query")
                .json_body_partial(r#"{"n_results":2}"#);
            then.status(200).json_body(json!({
                "ids": [["b", "a"]],
                "documents": [["second", "first"]],
                "metadatas": [[{"source": "b.txt"}, {"source": "a.txt"}]],
                "distances": [[0.42, 0.12]]
            }));
        })
        .await;

    let (status, body) = gateway(&server)
        .call(json!({
            "action": "query",
            "collection_name": "docs",
            "query": "what is rust?",
            "n_results": 2,
            "model_name": "text-embedding-3-small",
            "filters": {"where": null, "ignored": true}
        }))
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let results = &body["results"];
    assert_eq!(results["ids"], json!(["a", "b"]));
    assert_eq!(results["documents"], json!(["first", "second"]));
    assert_eq!(results["distances"], json!([0.12, 0.42]));
    assert_eq!(results["metadatas"][0]["source"], "a.txt");
    assert_eq!(results["model_used"], "text-embedding-3-small");
}

#[tokio::test]
async fn health_tracks_chroma_heartbeat() {
    let server = MockServer::start_async().await;
    let gateway = gateway(&server);

    let (status, body) = gateway.health().await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["chroma_connected"], false);

    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/heartbeat");
            then.status(200)
                .json_body(json!({"nanosecond heartbeat": 1_700_000_000_000_000_000u64}));
        })
        .await;
    let (status, body) = gateway.health().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "healthy", "service": "chroma-api", "chroma_connected": true})
    );
}
