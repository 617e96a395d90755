//! Header names and fixed values of the resumable-upload HTTP binding.

/// Protocol version sent in every request.
pub const TUS_RESUMABLE_VERSION: &str = "1.0.0";

/// Version negotiation header.
pub const HEADER_TUS_RESUMABLE: &str = "Tus-Resumable";

/// Total size of the upload, sent on creation.
pub const HEADER_UPLOAD_LENGTH: &str = "Upload-Length";

/// Server-confirmed (or client-assumed, on PATCH) byte offset.
pub const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";

/// Encoded descriptive metadata, sent on creation.
pub const HEADER_UPLOAD_METADATA: &str = "Upload-Metadata";

/// Content type required for chunk bodies.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";
