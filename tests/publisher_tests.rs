use artifact_publisher::api::CoordinatorClient;
use artifact_publisher::backend::GcsConnector;
use artifact_publisher::config::{CredentialsKind, StorageSettings};
use artifact_publisher::error::PublishError;
use artifact_publisher::publisher::{Publisher, UploadStrategy};
use artifact_publisher::retry::{BackoffSettings, RetryExecutor};
use mockito::{Matcher, Server};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SIGNED_URL_ENDPOINT: &str = "/httpAuth/plugins/google-storage/google-signed-urls.html";

fn fast_executor() -> RetryExecutor {
    RetryExecutor::new(
        BackoffSettings {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(10),
            max_elapsed_time: Duration::from_secs(30),
            ..BackoffSettings::default()
        },
        false,
    )
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn signed_url_mapping(blob_path: &str, url: &str) -> String {
    format!(
        "<signedUrlMappings><signedUrlMapping><blobPath>{blob_path}</blobPath>\
         <signedUrl>{url}</signedUrl></signedUrlMapping></signedUrlMappings>"
    )
}

#[tokio::test]
async fn test_signed_url_batch_with_one_rejected_file() {
    let mut server = Server::new_async().await;
    let temp_dir = TempDir::new().unwrap();
    let names = ["a.txt", "b.txt", "c.txt", "d.txt"];
    let files: Vec<PathBuf> = names
        .iter()
        .map(|name| write_file(&temp_dir, name, &name.repeat(10)))
        .collect();

    let mut mocks = Vec::new();
    for name in names {
        let blob = format!("build/7/out/{name}");
        mocks.push(
            server
                .mock("POST", SIGNED_URL_ENDPOINT)
                .match_body(Matcher::Regex(format!(">{}<", regex_escape(&blob))))
                .with_status(200)
                .with_body(signed_url_mapping(
                    &blob,
                    &format!("{}/signed/{name}", server.url()),
                ))
                .create_async()
                .await,
        );
        let status = if name == "c.txt" { 403 } else { 201 };
        mocks.push(
            server
                .mock("POST", format!("/signed/{name}").as_str())
                .with_status(status)
                .with_header("location", &format!("{}/session/{name}", server.url()))
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("PUT", format!("/session/{name}").as_str())
                .with_status(200)
                .create_async()
                .await,
        );
    }

    let coordinator = CoordinatorClient::new(
        reqwest::Client::new(),
        format!("{}{}", server.url(), SIGNED_URL_ENDPOINT),
        None,
        None,
    );
    let publisher = Publisher::new(
        UploadStrategy::SignedUrl {
            source: Arc::new(coordinator),
            client: reqwest::Client::new(),
        },
        fast_executor(),
        "build/7",
    );

    let outcomes = publisher
        .publish_all(files.iter().map(|f| (f.clone(), "out".to_string())).collect())
        .await;

    assert_eq!(outcomes.len(), 4);
    let records: Vec<_> = outcomes
        .iter()
        .filter_map(|(_, result)| result.as_ref().ok())
        .collect();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|record| record.length == 50));
    assert_eq!(outcomes[0].1.as_ref().unwrap().path, "out/a.txt");
    assert!(matches!(
        outcomes[2].1,
        Err(PublishError::ProtocolViolation {
            status: Some(403),
            ..
        })
    ));

    let err = publisher
        .publish(files.iter().map(|f| (f.clone(), "out".to_string())).collect())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("c.txt"));
}

fn regex_escape(text: &str) -> String {
    text.replace('.', r"\.")
}

#[tokio::test]
async fn test_direct_upload_reconnects_after_expired_token() {
    let mut server = Server::new_async().await;
    let temp_dir = TempDir::new().unwrap();
    let file = write_file(&temp_dir, "app.zip", "zip-bytes");

    let expired = server
        .mock("POST", "/upload/storage/v1/b/artifacts/o")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("uploadType".into(), "media".into()),
            Matcher::UrlEncoded("name".into(), "build/7/dist/app.zip".into()),
        ]))
        .match_header("authorization", "Bearer token-1")
        .with_status(401)
        .with_body("Invalid Credentials")
        .expect(1)
        .create_async()
        .await;
    let refreshed = server
        .mock("POST", "/upload/storage/v1/b/artifacts/o")
        .match_query(Matcher::UrlEncoded(
            "name".into(),
            "build/7/dist/app.zip".into(),
        ))
        .match_header("authorization", "Bearer token-2")
        .match_header("content-type", "application/zip")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "bucket": "artifacts",
                "name": "build/7/dist/app.zip",
                "size": "9"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let connects = Arc::new(AtomicU32::new(0));
    let counter = connects.clone();
    let connector = GcsConnector::new(reqwest::Client::new(), &server.url(), move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StorageSettings {
            credentials_kind: CredentialsKind::Key,
            access_key: None,
            access_token: Some(format!("token-{n}")),
            bucket_name: "artifacts".to_string(),
        })
    });

    let publisher = Publisher::new(
        UploadStrategy::Direct(Arc::new(connector)),
        fast_executor(),
        "build/7",
    );
    let records = publisher
        .publish(vec![(file, "dist".to_string())])
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "dist/app.zip");
    assert_eq!(records[0].length, 9);
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    expired.assert_async().await;
    refreshed.assert_async().await;
}

#[tokio::test]
async fn test_direct_upload_retries_server_errors_on_same_handle() {
    let mut server = Server::new_async().await;
    let temp_dir = TempDir::new().unwrap();
    let file = write_file(&temp_dir, "notes.txt", "hello");

    let unavailable = server
        .mock("POST", "/upload/storage/v1/b/artifacts/o")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let stored = server
        .mock("POST", "/upload/storage/v1/b/artifacts/o")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"name": "notes.txt", "size": "5"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let connects = Arc::new(AtomicU32::new(0));
    let counter = connects.clone();
    let connector = GcsConnector::new(reqwest::Client::new(), &server.url(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(StorageSettings {
            credentials_kind: CredentialsKind::Key,
            access_key: None,
            access_token: Some("token".to_string()),
            bucket_name: "artifacts".to_string(),
        })
    });

    let publisher = Publisher::new(
        UploadStrategy::Direct(Arc::new(connector)),
        fast_executor(),
        "",
    );
    let records = publisher
        .publish(vec![(file, String::new())])
        .await
        .unwrap();

    assert_eq!(records[0].path, "notes.txt");
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    unavailable.assert_async().await;
    stored.assert_async().await;
}
