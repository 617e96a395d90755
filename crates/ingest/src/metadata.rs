//! `Upload-Metadata` header encoding: comma-separated `key base64(value)`
//! pairs, with the value omitted when empty.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mediaferry_protocol::UploadMetadata;

use crate::IngestError;

/// Encodes metadata for the creation request.
pub fn encode_metadata(metadata: &UploadMetadata) -> Result<String, IngestError> {
    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata.iter() {
        if key.is_empty()
            || !key.is_ascii()
            || key.chars().any(|c| c.is_ascii_whitespace() || c == ',')
        {
            return Err(IngestError::InvalidMetadata(format!(
                "key cannot be encoded: {key:?}"
            )));
        }
        if value.is_empty() {
            pairs.push(key.to_string());
        } else {
            pairs.push(format!("{key} {}", STANDARD.encode(value)));
        }
    }
    Ok(pairs.join(","))
}

/// Decodes an `Upload-Metadata` header value.
pub fn decode_metadata(header: &str) -> Result<UploadMetadata, IngestError> {
    let mut metadata = UploadMetadata::new();
    for pair in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once(' ') {
            Some((key, encoded)) => {
                let raw = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| IngestError::InvalidMetadata(format!("{key}: {e}")))?;
                let value = String::from_utf8(raw)
                    .map_err(|e| IngestError::InvalidMetadata(format!("{key}: {e}")))?;
                (key, value)
            }
            None => (pair, String::new()),
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}
