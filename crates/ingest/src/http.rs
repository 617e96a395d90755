//! HTTP client for resumable-upload servers.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use mediaferry_protocol::UploadMetadata;
use mediaferry_protocol::constants::{
    HEADER_TUS_RESUMABLE, HEADER_UPLOAD_LENGTH, HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET,
    OFFSET_OCTET_STREAM, TUS_RESUMABLE_VERSION,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use crate::{ChunkOutcome, CreatedResource, IngestEndpoint, IngestError, IngestFuture, encode_metadata};

/// Connection settings for [`HttpIngestClient`].
#[derive(Debug, Clone)]
pub struct HttpIngestConfig {
    /// Creation URL, e.g. `https://media.example.com/files/`.
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<String>,
    /// Added to every request.
    pub extra_headers: BTreeMap<String, String>,
    pub connect_timeout: Duration,
}

impl HttpIngestConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            extra_headers: BTreeMap::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// [`IngestEndpoint`] over HTTP.
///
/// Per-request deadlines are enforced by the engine, so only the connect
/// timeout is configured here.
pub struct HttpIngestClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpIngestClient {
    pub fn new(config: HttpIngestConfig) -> Result<Self, IngestError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| IngestError::Config(format!("endpoint {:?}: {e}", config.endpoint)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_TUS_RESUMABLE,
            HeaderValue::from_static(TUS_RESUMABLE_VERSION),
        );
        if let Some(token) = &config.bearer_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| IngestError::Config("invalid bearer token".into()))?,
            );
        }
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| IngestError::Config(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| IngestError::Config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { http, endpoint })
    }

    /// The creation URL this client posts to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn create_inner(
        &self,
        total_bytes: u64,
        metadata: &UploadMetadata,
    ) -> Result<CreatedResource, IngestError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(HEADER_UPLOAD_LENGTH, total_bytes);
        if !metadata.is_empty() {
            request = request.header(HEADER_UPLOAD_METADATA, encode_metadata(metadata)?);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if status != StatusCode::CREATED {
            return Err(status_error(resp).await);
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| IngestError::Protocol("create response has no Location".into()))?;
        let handle = self
            .endpoint
            .join(location)
            .map_err(|e| IngestError::Protocol(format!("bad Location {location:?}: {e}")))?;
        // Some servers accept data with the creation request and report it.
        let committed_bytes = match resp.headers().get(HEADER_UPLOAD_OFFSET) {
            Some(_) => upload_offset(&resp)?,
            None => 0,
        };

        debug!(handle = %handle, total_bytes, "created upload resource");
        Ok(CreatedResource {
            handle: handle.to_string(),
            committed_bytes,
        })
    }

    async fn query_offset_inner(&self, handle: &str) -> Result<u64, IngestError> {
        let resp = self.http.head(handle).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(resp).await);
        }
        upload_offset(&resp)
    }

    async fn transfer_chunk_inner(
        &self,
        handle: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<ChunkOutcome, IngestError> {
        let len = data.len();
        let resp = self
            .http
            .patch(handle)
            .header(HEADER_UPLOAD_OFFSET, offset)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .body(data)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => {
                let committed = upload_offset(&resp)?;
                debug!(handle, offset, len, committed, "chunk acknowledged");
                Ok(ChunkOutcome::Committed(committed))
            }
            StatusCode::CONFLICT => Ok(ChunkOutcome::OffsetConflict),
            _ => Err(status_error(resp).await),
        }
    }

    async fn release_inner(&self, handle: &str) -> Result<(), IngestError> {
        let resp = self.http.delete(handle).send().await?;
        let status = resp.status();
        // Already gone counts as released.
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(());
        }
        Err(status_error(resp).await)
    }
}

impl IngestEndpoint for HttpIngestClient {
    fn create<'a>(
        &'a self,
        total_bytes: u64,
        metadata: &'a UploadMetadata,
    ) -> IngestFuture<'a, CreatedResource> {
        Box::pin(self.create_inner(total_bytes, metadata))
    }

    fn query_offset<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, u64> {
        Box::pin(self.query_offset_inner(handle))
    }

    fn transfer_chunk<'a>(
        &'a self,
        handle: &'a str,
        offset: u64,
        data: Bytes,
    ) -> IngestFuture<'a, ChunkOutcome> {
        Box::pin(self.transfer_chunk_inner(handle, offset, data))
    }

    fn release<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, ()> {
        Box::pin(self.release_inner(handle))
    }
}

fn upload_offset(resp: &Response) -> Result<u64, IngestError> {
    resp.headers()
        .get(HEADER_UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| IngestError::Protocol("missing or invalid Upload-Offset".into()))
}

async fn status_error(resp: Response) -> IngestError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    IngestError::from_status(status, body)
}
