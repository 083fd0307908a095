//! Tests for the HTTP transport against a mock transfer server.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ferry_core::chunk::ChunkSplitter;
use ferry_core::client::{ChunkTag, HttpTransport, Transport};
use ferry_core::config::ServerConfig;
use ferry_core::Error;

fn transport_for(server: &MockServer) -> HttpTransport {
    HttpTransport::new(&ServerConfig {
        base_url: server.uri(),
        request_timeout: None,
    })
    .expect("create transport")
}

fn second_chunk_tag(name: &str) -> ChunkTag {
    let plan = ChunkSplitter::new(10).split(name, 25);
    ChunkTag::new(&plan.chunk(1).unwrap(), 25, false)
}

#[tokio::test]
async fn test_upload_chunk_sends_tag_headers() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (10..20).collect();

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("content-range", "bytes 10-19/25"))
        .and(header("x-file-name", BASE64.encode("my report.pdf").as_str()))
        .and(header("x-chunk-index", "1"))
        .and(header("x-total-chunks", "3"))
        .and(header("x-is-canceled", "false"))
        .and(body_bytes(body.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fileAssembled": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = transport_for(&server)
        .upload_chunk(&second_chunk_tag("my report.pdf"), body)
        .await
        .expect("upload chunk");

    assert!(ack.file_assembled);
}

#[tokio::test]
async fn test_upload_chunk_carries_cancel_flag() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(header("x-is-canceled", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let mut tag = second_chunk_tag("a.bin");
    tag.canceled = true;
    let ack = transport_for(&server)
        .upload_chunk(&tag, vec![0; 10])
        .await
        .unwrap();

    assert!(!ack.file_assembled);
}

#[tokio::test]
async fn test_server_error_is_rejected_and_recoverable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let err = transport_for(&server)
        .upload_chunk(&second_chunk_tag("a.bin"), vec![0; 10])
        .await
        .unwrap_err();

    match &err {
        Error::ServerRejected { status, reason } => {
            assert_eq!(*status, 500);
            assert_eq!(reason, "disk full");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_recoverable());
    assert_eq!(err.code(), Some("E102"));
}

#[tokio::test]
async fn test_cancel_upload_sends_encoded_name() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload/cancel"))
        .and(header("x-file-name", BASE64.encode("résumé.docx").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    transport_for(&server)
        .cancel_upload("résumé.docx")
        .await
        .expect("cancel upload");
}

#[tokio::test]
async fn test_delete_endpoints() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/upload/delete/my%20file.txt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/upload/deleteAll"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    transport.delete_file("my file.txt").await.expect("delete file");

    let err = transport.delete_all().await.unwrap_err();
    assert!(matches!(err, Error::ServerRejected { status: 404, .. }));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_listings_return_html() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<li>a.bin</li>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/uploadfiles"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<li>b.bin</li>"))
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    assert_eq!(transport.list_uploaded().await.unwrap(), "<li>a.bin</li>");
    assert_eq!(transport.list_downloadable().await.unwrap(), "<li>b.bin</li>");
}

#[tokio::test]
async fn test_metadata_and_chunk_download() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/upload/metadata/video.mp4"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"chunkCount": 4})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/upload/download/video.mp4/2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    assert_eq!(transport.metadata("video.mp4").await.unwrap().chunk_count, 4);
    assert_eq!(
        transport.download_chunk("video.mp4", 2).await.unwrap(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_malformed_metadata_is_serialization_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/upload/metadata/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = transport_for(&server).metadata("x").await.unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let transport = HttpTransport::new(&ServerConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        request_timeout: Some(Duration::from_secs(5)),
    })
    .unwrap();

    let err = transport.list_uploaded().await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_request_timeout_applies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/uploadfiles"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&ServerConfig {
        base_url: server.uri(),
        request_timeout: Some(Duration::from_millis(100)),
    })
    .unwrap();

    let err = transport.list_downloadable().await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}
