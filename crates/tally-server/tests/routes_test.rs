//! Route-level tests driven through the full router with `oneshot`

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use tally_core::{Metric, ServerConfig};
use tally_ingress::{codec, generate_key_pair, EgressEncoder, IngressPipeline, Signer};
use tally_metrics::Persister;
use tally_server::{build_pipeline, open_persister, router, AppState};
use tempfile::tempdir;
use tower::ServiceExt;

fn plain_app() -> (Router, Persister) {
    let persister = Persister::in_memory();
    let app = router(AppState::new(persister.clone(), IngressPipeline::plain()));
    (app, persister)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).to_string())
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Vec<u8>, gzip: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if gzip {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn test_path_updates_and_lookups() {
    let (app, _) = plain_app();

    assert_eq!(send(&app, post("/update/gauge/Temp/23.5")).await.0, StatusCode::OK);
    assert_eq!(send(&app, post("/update/counter/Requests/1")).await.0, StatusCode::OK);
    let (status, body) = send(&app, post("/update/counter/Requests/4")).await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "5"));

    assert_eq!(
        send(&app, get("/value/gauge/Temp")).await,
        (StatusCode::OK, "23.5".to_string())
    );
    assert_eq!(
        send(&app, get("/value/counter/Requests")).await,
        (StatusCode::OK, "5".to_string())
    );
}

#[tokio::test]
async fn test_path_errors() {
    let (app, _) = plain_app();

    assert_eq!(send(&app, post("/update/histogram/Temp/1")).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(send(&app, post("/update/gauge/Temp/warm")).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(send(&app, post("/update/counter/Requests/1.5")).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(send(&app, get("/value/gauge/Missing")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(send(&app, get("/value/histogram/Temp")).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_json_update_and_query() {
    let (app, _) = plain_app();

    let (status, body) = send(
        &app,
        post_json("/update/", serde_json::to_vec(&Metric::counter("Requests", 3)).unwrap(), false),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stored: Metric = serde_json::from_str(&body).unwrap();
    assert_eq!(stored, Metric::counter("Requests", 3));

    let query = br#"{"id":"Requests","type":"counter"}"#.to_vec();
    let (status, body) = send(&app, post_json("/value/", query, false)).await;
    assert_eq!(status, StatusCode::OK);
    let found: Metric = serde_json::from_str(&body).unwrap();
    assert_eq!(found.delta, Some(3));

    let missing = br#"{"id":"Nope","type":"gauge"}"#.to_vec();
    assert_eq!(send(&app, post_json("/value/", missing, false)).await.0, StatusCode::NOT_FOUND);

    let garbage = b"{not json".to_vec();
    assert_eq!(send(&app, post_json("/update/", garbage, false)).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_gzipped_batch() {
    let (app, persister) = plain_app();

    let batch = vec![
        Metric::gauge("Temp", 23.5),
        Metric::counter("Requests", 1),
        Metric::counter("Requests", 4),
    ];
    let body = codec::compress(&serde_json::to_vec(&batch).unwrap()).unwrap();

    let (status, body) = send(&app, post_json("/updates/", body, true)).await;
    assert_eq!(status, StatusCode::OK);
    let stored: Vec<Metric> = serde_json::from_str(&body).unwrap();
    assert_eq!(stored.last().unwrap().delta, Some(5));
    assert_eq!(persister.counter("Requests").await.unwrap(), 5);
}

#[tokio::test]
async fn test_malformed_gzip_is_bad_request() {
    let (app, persister) = plain_app();
    let (status, _) = send(&app, post_json("/updates/", b"not gzip".to_vec(), true)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(persister.store().is_empty().await);
}

#[tokio::test]
async fn test_tampered_batch_is_rejected_whole() {
    let signer = Signer::new("secret");
    let persister = Persister::in_memory();
    let app = router(AppState::new(
        persister.clone(),
        IngressPipeline::new(None, Some(signer.clone()), false),
    ));

    let mut batch = vec![
        Metric::gauge("Temp", 23.5),
        Metric::counter("Requests", 1),
        Metric::gauge("Humidity", 40.0),
    ];
    for sample in &mut batch {
        signer.sign(sample).unwrap();
    }
    batch[1].delta = Some(100);

    let (status, _) = send(&app, post_json("/updates/", serde_json::to_vec(&batch).unwrap(), false)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(persister.store().is_empty().await);
}

#[tokio::test]
async fn test_encoded_batch_with_every_stage() {
    let (encryptor, decryptor) = generate_key_pair(1024).unwrap();
    let signer = Signer::new("secret");
    let persister = Persister::in_memory();
    let app = router(AppState::new(
        persister.clone(),
        IngressPipeline::new(Some(decryptor), Some(signer.clone()), true),
    ));

    let encoded = EgressEncoder::new(Some(signer), Some(encryptor))
        .encode(&[Metric::gauge("Temp", 23.5), Metric::counter("Requests", 5)])
        .unwrap();
    let (status, _) = send(&app, post_json("/updates/", encoded.body, encoded.compressed)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(persister.gauge("Temp").await.unwrap(), 23.5);
    assert_eq!(persister.counter("Requests").await.unwrap(), 5);
}

#[tokio::test]
async fn test_required_signatures_at_the_edge() {
    let signer = Signer::new("secret");
    let persister = Persister::in_memory();
    persister.apply_gauge("Temp", 23.5).await;
    let app = router(AppState::new(
        persister.clone(),
        IngressPipeline::new(None, Some(signer.clone()), true),
    ));

    let query = br#"{"id":"Temp","type":"gauge"}"#.to_vec();
    let (status, body) = send(&app, post_json("/value/", query, false)).await;
    assert_eq!(status, StatusCode::OK);
    let found: Metric = serde_json::from_str(&body).unwrap();
    assert_eq!(found.value, Some(23.5));

    assert_eq!(send(&app, post("/update/gauge/Temp/99")).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(persister.gauge("Temp").await.unwrap(), 23.5);

    let unsigned = serde_json::to_vec(&Metric::gauge("Temp", 99.0)).unwrap();
    assert_eq!(send(&app, post_json("/update/", unsigned, false)).await.0, StatusCode::BAD_REQUEST);

    let mut signed = Metric::gauge("Temp", 99.0);
    signer.sign(&mut signed).unwrap();
    let signed = serde_json::to_vec(&signed).unwrap();
    assert_eq!(send(&app, post_json("/update/", signed, false)).await.0, StatusCode::OK);
    assert_eq!(persister.gauge("Temp").await.unwrap(), 99.0);
}

#[tokio::test]
async fn test_ping_bypasses_ingress() {
    let persister = Persister::in_memory();
    let app = router(AppState::new(
        persister,
        IngressPipeline::new(None, Some(Signer::new("secret")), true),
    ));

    let request = Request::builder()
        .uri("/ping")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from("garbage"))
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_index_lists_metrics() {
    let (app, persister) = plain_app();
    persister.apply_gauge("Temp", 23.5).await;
    persister.apply_counter("Requests", 5).await.unwrap();

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<td>Temp</td><td>gauge</td><td>23.5</td>"));
    assert!(body.contains("<td>Requests</td><td>counter</td><td>5</td>"));
}

#[tokio::test]
async fn test_synchronous_file_storage_and_ping() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let config = ServerConfig {
        store_interval_secs: 0,
        file_storage_path: Some(path.clone()),
        ..ServerConfig::default()
    };

    let persister = open_persister(&config).await.unwrap();
    let app = router(AppState::new(persister, build_pipeline(&config).unwrap()));

    assert_eq!(send(&app, post("/update/gauge/Temp/23.5")).await.0, StatusCode::OK);
    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("Temp"));

    assert_eq!(send(&app, get("/ping")).await.0, StatusCode::OK);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(send(&app, get("/ping")).await.0, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_startup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    std::fs::write(&path, "{{{").unwrap();

    let config = ServerConfig {
        file_storage_path: Some(path),
        restore: true,
        ..ServerConfig::default()
    };
    assert!(matches!(
        open_persister(&config).await,
        Err(tally_core::TallyError::Startup(_))
    ));
}

#[test]
fn test_require_signatures_needs_key() {
    let config = ServerConfig {
        require_signatures: true,
        key: None,
        ..ServerConfig::default()
    };
    assert!(build_pipeline(&config).is_err());
}
