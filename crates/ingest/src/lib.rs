//! Ingest endpoint contract and its HTTP binding.
//!
//! [`IngestEndpoint`] is the transport-agnostic seam the upload engine
//! drives. [`HttpIngestClient`] implements it over the resumable-upload
//! HTTP convention (`POST` to create, `HEAD` for the offset, `PATCH` for
//! chunks, `DELETE` to release). Tests substitute an in-memory endpoint.

mod error;
mod http;
mod metadata;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use mediaferry_protocol::UploadMetadata;

pub use error::IngestError;
pub use http::{HttpIngestClient, HttpIngestConfig};
pub use metadata::{decode_metadata, encode_metadata};

/// Boxed future returned by [`IngestEndpoint`] methods.
pub type IngestFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, IngestError>> + Send + 'a>>;

/// A remote upload resource allocated by the create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    /// Opaque handle (URL) used for every later call.
    pub handle: String,
    /// Bytes the server already holds; 0 for a new resource.
    pub committed_bytes: u64,
}

/// Server answer to a chunk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The server durably applied data up to this offset.
    Committed(u64),
    /// The request offset did not match the server's position.
    OffsetConflict,
}

/// Abstract connection to the remote ingest service.
///
/// Every call is a single request; retries, deadlines and cancellation are
/// the caller's concern.
pub trait IngestEndpoint: Send + Sync {
    /// Allocates a resource for `total_bytes` carrying `metadata`.
    fn create<'a>(
        &'a self,
        total_bytes: u64,
        metadata: &'a UploadMetadata,
    ) -> IngestFuture<'a, CreatedResource>;

    /// Returns the server's authoritative committed offset.
    fn query_offset<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, u64>;

    /// Sends `data` to be written at `offset`.
    fn transfer_chunk<'a>(
        &'a self,
        handle: &'a str,
        offset: u64,
        data: Bytes,
    ) -> IngestFuture<'a, ChunkOutcome>;

    /// Asks the server to drop the resource.
    fn release<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, ()>;
}
