//! Resumable upload client for the hosted storage service.
//!
//! Uploads follow the tus 1.0.0 protocol: one `POST` creates the upload resource,
//! then the file is sent in fixed-size chunks with `PATCH` requests carrying the
//! current `Upload-Offset`. Every request is authenticated with the caller's session
//! token. Each chunk boundary is a cancellation point, and an in-flight request is
//! abandoned as soon as the token fires.

use super::{ArtifactUploader, ObjectStorage, UploadProgress, UploadRequest, UploadedArtifact};
use crate::config::storage::StorageConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const TUS_VERSION: &str = "1.0.0";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";
const CACHE_CONTROL: &str = "3600";

/// Storage service client bound to one operator session
#[derive(Debug, Clone)]
pub struct StorageClient {
    http: Client,
    config: StorageConfig,
    session_token: String,
}

impl StorageClient {
    /// Creates a client that authenticates as the holder of `session_token`.
    ///
    /// # Errors
    /// Returns `Config` if the settings are invalid and `Transport` if the HTTP
    /// client cannot be built.
    pub fn new(config: StorageConfig, session_token: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .user_agent(concat!("fleetdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            session_token: session_token.into(),
        })
    }

    /// Public URL under which `storage_path` is served.
    #[must_use]
    pub fn public_url(&self, storage_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url(),
            self.config.bucket,
            storage_path
        )
    }

    fn resumable_endpoint(&self) -> String {
        format!("{}/storage/v1/upload/resumable", self.config.base_url())
    }

    fn upload_metadata(&self, storage_path: &str, content_type: &str) -> String {
        [
            ("bucketName", self.config.bucket.as_str()),
            ("objectName", storage_path),
            ("contentType", content_type),
            ("cacheControl", CACHE_CONTROL),
        ]
        .iter()
        .map(|(key, value)| format!("{key} {}", STANDARD.encode(value)))
        .collect::<Vec<_>>()
        .join(",")
    }

    /// Creates the upload resource and returns its absolute URL.
    async fn create_upload(
        &self,
        storage_path: &str,
        length: u64,
        content_type: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(self.resumable_endpoint())
            .bearer_auth(&self.session_token)
            .header("apikey", &self.config.api_key)
            .header("tus-resumable", TUS_VERSION)
            .header("upload-length", length.to_string())
            .header(
                "upload-metadata",
                self.upload_metadata(storage_path, content_type),
            )
            .header("x-upsert", "false")
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response, "create upload").await?;
        let location = response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Transport {
                message: "Upload creation response has no Location header".to_string(),
            })?;

        if location.starts_with('/') {
            Ok(format!("{}{location}", self.config.base_url()))
        } else {
            Ok(location.to_string())
        }
    }

    /// Sends one chunk at `offset` and returns the offset the server acknowledged.
    async fn send_chunk(&self, location: &str, offset: u64, chunk: Vec<u8>) -> Result<u64> {
        let expected = offset + chunk.len() as u64;
        let response = self
            .http
            .patch(location)
            .bearer_auth(&self.session_token)
            .header("apikey", &self.config.api_key)
            .header("tus-resumable", TUS_VERSION)
            .header("upload-offset", offset.to_string())
            .header("content-type", OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response, "upload chunk").await?;
        let acknowledged = response
            .headers()
            .get("upload-offset")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| Error::Transport {
                message: "Chunk response has no valid Upload-Offset header".to_string(),
            })?;

        if acknowledged != expected {
            return Err(Error::Transport {
                message: format!(
                    "Server acknowledged offset {acknowledged}, expected {expected}"
                ),
            });
        }
        Ok(acknowledged)
    }
}

#[async_trait]
impl ArtifactUploader for StorageClient {
    #[instrument(skip(self, progress, cancel), fields(file = %request.file_name))]
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: &mut (dyn FnMut(UploadProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<UploadedArtifact> {
        let mut file = tokio::fs::File::open(request.path()).await?;
        let total = file.metadata().await?.len();
        if total == 0 {
            return Err(Error::validation(format!(
                "{} is empty",
                request.file_name
            )));
        }

        let storage_path = super::object_path(&request.file_name, chrono::Utc::now());
        let location = until_cancelled(
            cancel,
            self.create_upload(&storage_path, total, &request.content_type),
        )
        .await?;
        debug!("Created upload resource {} for {} bytes", location, total);

        let started = Instant::now();
        let mut buffer = vec![0_u8; self.config.chunk_size];
        let mut offset = 0_u64;

        while offset < total {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let len = read_chunk(&mut file, &mut buffer).await?;
            if len == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} shrank during upload", request.file_name),
                )));
            }

            offset = until_cancelled(
                cancel,
                self.send_chunk(&location, offset, buffer[..len].to_vec()),
            )
            .await?;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            progress(UploadProgress {
                bytes_uploaded: offset,
                bytes_total: total,
                elapsed: started.elapsed(),
            });
        }

        info!("Uploaded {} ({} bytes) to {}", request.file_name, total, storage_path);
        Ok(UploadedArtifact {
            public_url: self.public_url(&storage_path),
            file_name: request.file_name.clone(),
            storage_path,
            file_size: total,
        })
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> Result<()> {
        let url = format!(
            "{}/storage/v1/object/{}",
            self.config.base_url(),
            self.config.bucket
        );
        let response = self
            .http
            .delete(url)
            .bearer_auth(&self.session_token)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "prefixes": [path] }))
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Remove request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Storage refused to remove {}: {} {}", path, status, body);
            return Err(Error::Storage {
                message: format!("Removing {path} failed with status {status}: {body}"),
            });
        }
        Ok(())
    }
}

/// Races `future` against `cancel`; cancellation wins ties.
async fn until_cancelled<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// Fills `buffer` from `file`, returning fewer bytes only at end of file.
async fn read_chunk(file: &mut tokio::fs::File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::Transport {
        message: format!("Request failed: {err}"),
    }
}

async fn check_status(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("Authentication failed during {action} ({status}): {body}")
        }
        _ => format!("{action} failed with status {status}: {body}"),
    };
    Err(Error::Transport { message })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::io::Write;

    fn client_for(server: &ServerGuard, chunk_size: usize) -> StorageClient {
        let config = StorageConfig {
            endpoint: server.url(),
            api_key: "anon-key".to_string(),
            bucket: "releases".to_string(),
            chunk_size,
        };
        StorageClient::new(config, "session-token").unwrap()
    }

    fn artifact_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn request_for(file: &tempfile::NamedTempFile) -> UploadRequest {
        UploadRequest {
            path: file.path().to_path_buf(),
            file_name: "fw 2.0.0.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upload_sends_chunks_and_reports_progress() {
        let mut server = Server::new_async().await;
        let location = format!("{}/upload/resumable/abc", server.url());

        let create = server
            .mock("POST", "/storage/v1/upload/resumable")
            .match_header("authorization", "Bearer session-token")
            .match_header("apikey", "anon-key")
            .match_header("tus-resumable", "1.0.0")
            .match_header("upload-length", "10")
            .with_status(201)
            .with_header("location", &location)
            .create_async()
            .await;

        let mut chunks = Vec::new();
        for (offset, next) in [(0, 4), (4, 8), (8, 10)] {
            let mock = server
                .mock("PATCH", "/upload/resumable/abc")
                .match_header("upload-offset", offset.to_string().as_str())
                .match_header("content-type", OFFSET_CONTENT_TYPE)
                .with_status(204)
                .with_header("upload-offset", &next.to_string())
                .create_async()
                .await;
            chunks.push(mock);
        }

        let client = client_for(&server, 4);
        let file = artifact_file(b"0123456789");
        let mut seen = Vec::new();
        let artifact = client
            .upload(
                &request_for(&file),
                &mut |p: UploadProgress| seen.push((p.bytes_uploaded, p.bytes_total)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(seen, vec![(4, 10), (8, 10), (10, 10)]);
        assert_eq!(artifact.file_name, "fw 2.0.0.bin");
        assert_eq!(artifact.file_size, 10);
        assert!(artifact.storage_path.starts_with("releases/"));
        assert!(artifact.storage_path.ends_with("-fw_2.0.0.bin"));
        assert_eq!(
            artifact.public_url,
            format!(
                "{}/storage/v1/object/public/releases/{}",
                server.url(),
                artifact.storage_path
            )
        );

        create.assert_async().await;
        for mock in chunks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_upload_cancelled_before_start() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/storage/v1/upload/resumable")
            .with_status(201)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server, 4);
        let file = artifact_file(b"0123456789");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut calls = 0;
        let result = client
            .upload(&request_for(&file), &mut |_| calls += 1, &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 0);
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_cancelled_between_chunks() {
        let mut server = Server::new_async().await;
        let location = format!("{}/upload/resumable/xyz", server.url());
        server
            .mock("POST", "/storage/v1/upload/resumable")
            .with_status(201)
            .with_header("location", &location)
            .create_async()
            .await;
        let first = server
            .mock("PATCH", "/upload/resumable/xyz")
            .match_header("upload-offset", "0")
            .with_status(204)
            .with_header("upload-offset", "4")
            .create_async()
            .await;
        let rest = server
            .mock("PATCH", "/upload/resumable/xyz")
            .match_header("upload-offset", Matcher::Regex("^[48]$".to_string()))
            .with_status(204)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server, 4);
        let file = artifact_file(b"0123456789");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut seen = Vec::new();
        let result = client
            .upload(
                &request_for(&file),
                &mut |p: UploadProgress| {
                    seen.push(p.bytes_uploaded);
                    trigger.cancel();
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(seen, vec![4]);
        first.assert_async().await;
        rest.assert_async().await;
    }

    /// Answers the upload creation, then holds the first PATCH open without replying
    /// and cancels `on_patch` once that request has arrived.
    fn stalling_server(on_patch: CancellationToken) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let on_patch = on_patch.clone();
                std::thread::spawn(move || serve_until_patch(stream, &on_patch));
            }
        });
        format!("http://{addr}")
    }

    fn serve_until_patch(mut stream: std::net::TcpStream, on_patch: &CancellationToken) {
        use std::io::{BufRead, BufReader, Read};

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        loop {
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
                return;
            }
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap_or(0) == 0 {
                    return;
                }
                if header == "\r\n" {
                    break;
                }
            }

            if request_line.starts_with("POST") {
                stream
                    .write_all(
                        b"HTTP/1.1 201 Created\r\n\
                          Location: /upload/resumable/stalled\r\n\
                          Tus-Resumable: 1.0.0\r\n\
                          Content-Length: 0\r\n\r\n",
                    )
                    .unwrap();
            } else {
                on_patch.cancel();
                // Never answer; drain until the client hangs up
                let mut sink = [0_u8; 1024];
                while reader.read(&mut sink).is_ok_and(|n| n > 0) {}
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_upload_cancelled_while_chunk_in_flight() {
        let cancel = CancellationToken::new();
        let endpoint = stalling_server(cancel.clone());
        let client = StorageClient::new(
            StorageConfig {
                endpoint,
                api_key: "anon-key".to_string(),
                bucket: "releases".to_string(),
                chunk_size: 4,
            },
            "session-token",
        )
        .unwrap();
        let file = artifact_file(b"0123456789");

        let started = Instant::now();
        let mut calls = 0;
        let result = client
            .upload(&request_for(&file), &mut |_| calls += 1, &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(cancel.is_cancelled());
        assert_eq!(calls, 0);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_upload_auth_failure_is_transport_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/storage/v1/upload/resumable")
            .with_status(401)
            .with_body("invalid token")
            .create_async()
            .await;

        let client = client_for(&server, 4);
        let file = artifact_file(b"0123456789");
        let result = client
            .upload(&request_for(&file), &mut |_| {}, &CancellationToken::new())
            .await;

        match result {
            Err(Error::Transport { message }) => {
                assert!(message.contains("Authentication failed"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_offset_mismatch() {
        let mut server = Server::new_async().await;
        let location = format!("{}/upload/resumable/bad", server.url());
        server
            .mock("POST", "/storage/v1/upload/resumable")
            .with_status(201)
            .with_header("location", &location)
            .create_async()
            .await;
        server
            .mock("PATCH", "/upload/resumable/bad")
            .with_status(204)
            .with_header("upload-offset", "2")
            .create_async()
            .await;

        let client = client_for(&server, 4);
        let file = artifact_file(b"0123456789");
        let result = client
            .upload(&request_for(&file), &mut |_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Transport { message: _ })));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_file() {
        let server = Server::new_async().await;
        let client = client_for(&server, 4);
        let file = artifact_file(b"");
        let result = client
            .upload(&request_for(&file), &mut |_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Validation { message: _ })));
    }

    #[tokio::test]
    async fn test_remove_object() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/storage/v1/object/releases")
            .match_header("authorization", "Bearer session-token")
            .match_body(Matcher::Json(serde_json::json!({
                "prefixes": ["releases/1-fw.bin"]
            })))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = client_for(&server, 4);
        client.remove("releases/1-fw.bin").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remove_object_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/storage/v1/object/releases")
            .with_status(500)
            .create_async()
            .await;

        let client = client_for(&server, 4);
        let result = client.remove("releases/1-fw.bin").await;
        assert!(matches!(result, Err(Error::Storage { message: _ })));
    }

    #[test]
    fn test_upload_metadata_is_base64() {
        let config = StorageConfig {
            endpoint: "https://backend.example.com".to_string(),
            api_key: "k".to_string(),
            bucket: "releases".to_string(),
            chunk_size: 4,
        };
        let client = StorageClient::new(config, "t").unwrap();
        let metadata = client.upload_metadata("releases/1-fw.bin", "application/octet-stream");
        assert!(metadata.starts_with(&format!("bucketName {}", STANDARD.encode("releases"))));
        assert!(metadata.contains(&format!("objectName {}", STANDARD.encode("releases/1-fw.bin"))));
    }
}
