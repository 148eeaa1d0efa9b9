use std::net::SocketAddr;

use axum_media_range::config::Config;
use axum_media_range::server::router;
use axum_media_range::DiskStore;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct TestServer {
    dir: TempDir,
    addr: SocketAddr,
    client: Client,
}

impl TestServer {
    async fn start() -> TestServer {
        TestServer::start_with(Config { chunk_size: 1000, ..Config::default() }).await
    }

    async fn start_with(config: Config) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::create(dir.path().join("uploads")).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(store, config)).await.unwrap();
        });

        TestServer { dir, addr, client: Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn put_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.dir.path().join("uploads").join(name), data).unwrap();
    }

    async fn list(&self) -> Vec<String> {
        let response = self.client.get(self.url("/")).send().await.unwrap();
        assert_eq!(StatusCode::OK, response.status());
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
    }

    async fn upload(&self, filename: &str, data: Vec<u8>) -> reqwest::Response {
        let form = Form::new()
            .percent_encode_noop()
            .part("file", Part::bytes(data).file_name(filename.to_string()));
        self.client.post(self.url("/upload")).multipart(form).send().await.unwrap()
    }

    fn uploads_on_disk(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("uploads")).unwrap().count()
    }

    async fn get_range(&self, path: &str, range: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(range) = range {
            request = request.header("Range", range);
        }
        request.send().await.unwrap()
    }
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).map(|v| v.to_str().unwrap())
}

fn source(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[tokio::test]
async fn test_ranged_request_end_to_end() {
    let server = TestServer::start().await;
    let data = source(10_000);
    server.put_file("clip.mp4", &data);

    let response = server.get_range("/video/clip.mp4", Some("bytes=100-199")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 100-199/10000"), header(&response, "content-range"));
    assert_eq!(Some("bytes"), header(&response, "accept-ranges"));
    assert_eq!(Some("100"), header(&response, "content-length"));
    assert_eq!(Some("video/mp4"), header(&response, "content-type"));

    let body = response.bytes().await.unwrap();
    assert_eq!(&data[100..200], &body[..]);
}

#[tokio::test]
async fn test_full_request_end_to_end() {
    let server = TestServer::start().await;
    let data = source(10_000);
    server.put_file("clip.webm", &data);

    let response = server.get_range("/video/clip.webm", None).await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(Some("10000"), header(&response, "content-length"));
    assert_eq!(None, header(&response, "content-range"));
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_open_ended_and_clamped_ranges() {
    let server = TestServer::start().await;
    let data = source(1000);
    server.put_file("clip.mp4", &data);

    let response = server.get_range("/video/clip.mp4", Some("bytes=500-")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 500-999/1000"), header(&response, "content-range"));
    assert_eq!(&data[500..], &response.bytes().await.unwrap()[..]);

    let response = server.get_range("/video/clip.mp4", Some("bytes=990-5000")).await;
    assert_eq!(Some("bytes 990-999/1000"), header(&response, "content-range"));
    assert_eq!(10, response.bytes().await.unwrap().len());
}

#[tokio::test]
async fn test_rejected_ranges() {
    let server = TestServer::start().await;
    server.put_file("clip.mp4", &source(1000));

    let response = server.get_range("/video/clip.mp4", Some("bytes=1000-")).await;
    assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
    assert_eq!(Some("bytes */1000"), header(&response, "content-range"));
    assert!(response.bytes().await.unwrap().is_empty());

    let response = server.get_range("/video/clip.mp4", Some("frames=0-10")).await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

// Garbled numbers degrade to defaults instead of a 400.
#[tokio::test]
async fn test_lenient_range_policy() {
    let server = TestServer::start().await;
    let data = source(1000);
    server.put_file("clip.mp4", &data);

    let response = server.get_range("/video/clip.mp4", Some("bytes=-abc-")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 0-999/1000"), header(&response, "content-range"));
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_repeated_ranges_are_identical() {
    let server = TestServer::start().await;
    server.put_file("clip.mp4", &source(5000));

    let first = server.get_range("/video/clip.mp4", Some("bytes=1234-4321")).await.bytes().await.unwrap();
    let second = server.get_range("/video/clip.mp4", Some("bytes=1234-4321")).await.bytes().await.unwrap();
    assert_eq!(3088, first.len());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_and_traversal_are_not_found() {
    let server = TestServer::start().await;
    std::fs::write(server.dir.path().join("secret.mp4"), b"outside the root").unwrap();

    let response = server.get_range("/video/nope.mp4", None).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());

    let response = server.get_range("/video/%2E%2E%2Fsecret.mp4", None).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());

    let response = server.get_range("/video/%2E%2E%2Fsecret.mp4", Some("bytes=0-3")).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
}

#[tokio::test]
async fn test_head_reports_length() {
    let server = TestServer::start().await;
    server.put_file("clip.mp4", &source(2048));

    let response = server.client.head(server.url("/video/clip.mp4")).send().await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(Some("2048"), header(&response, "content-length"));
    assert_eq!(Some("bytes"), header(&response, "accept-ranges"));
}

#[tokio::test]
async fn test_upload_play_and_delete() {
    let server = TestServer::start().await;
    assert!(server.list().await.is_empty());

    let data = source(4096);
    let response = server.upload("My Holiday.mp4", data.clone()).await;
    // the redirect to the index is followed
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(vec!["My_Holiday.mp4".to_string()], server.list().await);

    let response = server.get_range("/video/My_Holiday.mp4", Some("bytes=4000-")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(&data[4000..], &response.bytes().await.unwrap()[..]);

    let response = server.client.post(server.url("/delete/My_Holiday.mp4")).send().await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert!(server.list().await.is_empty());

    let response = server.get_range("/video/My_Holiday.mp4", None).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
}

#[tokio::test]
async fn test_upload_rejections_are_skipped() {
    let server = TestServer::start().await;

    let response = server.upload("script.sh", b"#!/bin/sh".to_vec()).await;
    assert_eq!(StatusCode::OK, response.status());

    let response = server.upload("../../escape.mp4", b"data".to_vec()).await;
    assert_eq!(StatusCode::OK, response.status());

    assert_eq!(vec!["escape.mp4".to_string()], server.list().await);
    assert!(!server.dir.path().join("escape.mp4").exists());
}

#[tokio::test]
async fn test_upload_requires_multipart() {
    let server = TestServer::start().await;

    let response = server.client.post(server.url("/upload")).body("plain").send().await.unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

#[tokio::test]
async fn test_delete_outside_root_is_ignored() {
    let server = TestServer::start().await;
    std::fs::write(server.dir.path().join("keep.mp4"), b"keep me").unwrap();

    let response = server.client.post(server.url("/delete/%2E%2E%2Fkeep.mp4")).send().await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert!(server.dir.path().join("keep.mp4").exists());
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let server = TestServer::start_with(Config { max_upload_bytes: 1024, ..Config::default() }).await;

    let response = server.upload("big.mp4", source(4096)).await;
    assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, response.status());
    assert!(server.list().await.is_empty());
    assert_eq!(0, server.uploads_on_disk());
}

#[tokio::test]
async fn test_extension_is_checked_before_sanitising() {
    let server = TestServer::start().await;

    let response = server.upload("clip.mp4 ", b"data".to_vec()).await;
    assert_eq!(StatusCode::OK, response.status());
    assert!(server.list().await.is_empty());
}

#[tokio::test]
async fn test_conditional_requests() {
    let server = TestServer::start().await;
    let data = source(3000);
    server.put_file("clip.mp4", &data);

    let response = server.get_range("/video/clip.mp4", None).await;
    assert_eq!(StatusCode::OK, response.status());
    let etag = header(&response, "etag").expect("etag").to_string();
    let last_modified = header(&response, "last-modified").expect("last-modified").to_string();

    let response = server
        .client
        .get(server.url("/video/clip.mp4"))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_MODIFIED, response.status());
    assert_eq!(Some(etag.as_str()), header(&response, "etag"));
    assert!(response.bytes().await.unwrap().is_empty());

    let response = server
        .client
        .get(server.url("/video/clip.mp4"))
        .header("If-Modified-Since", &last_modified)
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_MODIFIED, response.status());

    let response = server
        .client
        .get(server.url("/video/clip.mp4"))
        .header("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);

    let response = server
        .client
        .get(server.url("/video/clip.mp4"))
        .header("Range", "bytes=100-199")
        .header("If-Range", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(&data[100..200], &response.bytes().await.unwrap()[..]);

    let response = server
        .client
        .get(server.url("/video/clip.mp4"))
        .header("Range", "bytes=100-199")
        .header("If-Range", "\"outdated\"")
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(None, header(&response, "content-range"));
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_reupload_changes_etag() {
    let server = TestServer::start().await;
    server.put_file("clip.mp4", &source(100));
    let first = server.get_range("/video/clip.mp4", None).await;
    let first = header(&first, "etag").unwrap().to_string();

    server.put_file("clip.mp4", &source(200));
    let second = server.get_range("/video/clip.mp4", None).await;
    assert_ne!(Some(first.as_str()), header(&second, "etag"));
}
