use mediaferry_protocol::UploadMetadata;

use crate::TransferError;

/// Validates that metadata keys can be carried by the ingest protocol.
///
/// Rejects:
/// - Empty keys
/// - Keys containing whitespace or commas (the pair separators)
/// - Non-ASCII keys
///
/// Values are opaque and are encoded by the transport.
pub fn validate_metadata(metadata: &UploadMetadata) -> Result<(), TransferError> {
    for (key, _) in metadata.iter() {
        if key.is_empty() {
            return Err(TransferError::InvalidMetadata("empty key".into()));
        }
        if !key.is_ascii() {
            return Err(TransferError::InvalidMetadata(format!(
                "non-ASCII key not allowed: {key}"
            )));
        }
        if key.chars().any(|c| c.is_ascii_whitespace() || c == ',') {
            return Err(TransferError::InvalidMetadata(format!(
                "key contains a separator: {key:?}"
            )));
        }
    }
    Ok(())
}
