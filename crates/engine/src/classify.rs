use mediaferry_ingest::IngestError;
use mediaferry_protocol::FailureReason;
use mediaferry_transfer::ErrorClass;

/// Maps an endpoint error to its retry class and the reason recorded on the
/// session.
pub(crate) fn classify(err: &IngestError) -> (ErrorClass, FailureReason) {
    match err {
        IngestError::Network(_) | IngestError::Timeout | IngestError::Server { .. } => {
            (ErrorClass::Retryable, FailureReason::Transient)
        }
        IngestError::NotFound => (ErrorClass::Fatal, FailureReason::ResourceGone),
        IngestError::Protocol(_) => (ErrorClass::Fatal, FailureReason::ProtocolViolation),
        IngestError::Client { .. } | IngestError::InvalidMetadata(_) | IngestError::Config(_) => {
            (ErrorClass::Fatal, FailureReason::Rejected)
        }
    }
}
