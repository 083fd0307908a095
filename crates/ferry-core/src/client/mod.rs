//! HTTP transport for the transfer server.
//!
//! The server exposes a small REST surface under `/api`:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST | `/api/upload` | store one chunk |
//! | POST | `/api/upload/cancel` | discard a partial upload |
//! | DELETE | `/api/upload/deleteAll` | remove every file |
//! | DELETE | `/api/upload/delete/<name>` | remove one file |
//! | GET | `/api/upload` | HTML list of uploaded files |
//! | GET | `/api/uploadfiles` | HTML list of downloadable files |
//! | GET | `/api/upload/metadata/<name>` | `{"chunkCount": n}` |
//! | GET | `/api/upload/download/<name>/<index>` | raw chunk bytes |
//!
//! File names travel base64-encoded in the `X-File-Name` header and
//! percent-encoded in path segments.

use std::future::Future;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Header carrying the base64 file name.
pub const FILE_NAME_HEADER: &str = "X-File-Name";
/// Header carrying the chunk index.
pub const CHUNK_INDEX_HEADER: &str = "X-Chunk-Index";
/// Header carrying the file's chunk count.
pub const TOTAL_CHUNKS_HEADER: &str = "X-Total-Chunks";
/// Header carrying the cancel flag at dispatch time.
pub const IS_CANCELED_HEADER: &str = "X-Is-Canceled";

/// Everything the server needs to place one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTag {
    /// Name of the file
    pub file_name: String,
    /// Index of the chunk
    pub chunk_index: u64,
    /// Number of chunks in the file
    pub total_chunks: u64,
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (exclusive)
    pub end: u64,
    /// Size of the whole file
    pub file_size: u64,
    /// Cancel flag when the chunk was dispatched
    pub canceled: bool,
}

impl ChunkTag {
    /// Tag `chunk` of a `file_size`-byte file.
    #[must_use]
    pub fn new(chunk: &Chunk, file_size: u64, canceled: bool) -> Self {
        Self {
            file_name: chunk.file_name.clone(),
            chunk_index: chunk.index,
            total_chunks: chunk.total_chunks,
            start: chunk.start,
            end: chunk.end,
            file_size,
            canceled,
        }
    }

    /// `Content-Range` header value.
    #[must_use]
    pub fn content_range(&self) -> String {
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.end.saturating_sub(1),
            self.file_size
        )
    }
}

/// Server reply to a chunk upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    /// The server has every chunk and assembled the file
    #[serde(default)]
    pub file_assembled: bool,
}

/// Server description of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMetadata {
    /// Number of chunks the file is served in
    pub chunk_count: u64,
}

/// Operations the engine needs from the transfer server.
pub trait Transport: Send + Sync + 'static {
    /// Upload the bytes of one chunk.
    fn upload_chunk(
        &self,
        tag: &ChunkTag,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<UploadAck>> + Send;

    /// Ask the server to discard a partial upload.
    fn cancel_upload(&self, file_name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove every stored file.
    fn delete_all(&self) -> impl Future<Output = Result<()>> + Send;

    /// Remove one stored file.
    fn delete_file(&self, file_name: &str) -> impl Future<Output = Result<()>> + Send;

    /// HTML fragment listing uploaded files.
    fn list_uploaded(&self) -> impl Future<Output = Result<String>> + Send;

    /// HTML fragment listing downloadable files.
    fn list_downloadable(&self) -> impl Future<Output = Result<String>> + Send;

    /// Chunk layout of a stored file.
    fn metadata(&self, file_name: &str)
        -> impl Future<Output = Result<RemoteFileMetadata>> + Send;

    /// Bytes of one stored chunk.
    fn download_chunk(
        &self,
        file_name: &str,
        chunk_index: u64,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// [`Transport`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport for the configured server.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::InvalidConfig {
            key: "server.base_url".to_string(),
            reason: e.to_string(),
        })?;

        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig {
                key: "server.base_url".to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Base address of the server.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Turn a non-success response into [`Error::ServerRejected`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body.trim().to_string()
    };

    Err(Error::ServerRejected {
        status: status.as_u16(),
        reason,
    })
}

impl Transport for HttpTransport {
    async fn upload_chunk(&self, tag: &ChunkTag, body: Vec<u8>) -> Result<UploadAck> {
        let response = self
            .client
            .post(self.endpoint(&["api", "upload"]))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_RANGE, tag.content_range())
            .header(FILE_NAME_HEADER, BASE64.encode(&tag.file_name))
            .header(CHUNK_INDEX_HEADER, tag.chunk_index.to_string())
            .header(TOTAL_CHUNKS_HEADER, tag.total_chunks.to_string())
            .header(IS_CANCELED_HEADER, tag.canceled.to_string())
            .body(body)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn cancel_upload(&self, file_name: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["api", "upload", "cancel"]))
            .header(FILE_NAME_HEADER, BASE64.encode(file_name))
            .send()
            .await?;

        check(response).await.map(drop)
    }

    async fn delete_all(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["api", "upload", "deleteAll"]))
            .send()
            .await?;

        check(response).await.map(drop)
    }

    async fn delete_file(&self, file_name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["api", "upload", "delete", file_name]))
            .send()
            .await?;

        check(response).await.map(drop)
    }

    async fn list_uploaded(&self) -> Result<String> {
        let response = self
            .client
            .get(self.endpoint(&["api", "upload"]))
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    async fn list_downloadable(&self) -> Result<String> {
        let response = self
            .client
            .get(self.endpoint(&["api", "uploadfiles"]))
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    async fn metadata(&self, file_name: &str) -> Result<RemoteFileMetadata> {
        let response = self
            .client
            .get(self.endpoint(&["api", "upload", "metadata", file_name]))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn download_chunk(&self, file_name: &str, chunk_index: u64) -> Result<Vec<u8>> {
        let index = chunk_index.to_string();
        let response = self
            .client
            .get(self.endpoint(&["api", "upload", "download", file_name, &index]))
            .send()
            .await?;

        Ok(check(response).await?.bytes().await?.to_vec())
    }
}
