/// Errors from talking to the ingest endpoint.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request rejected {status}: {body}")]
    Client { status: u16, body: String },

    #[error("upload resource not found")]
    NotFound,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl IngestError {
    /// Maps an unexpected HTTP status to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 | 410 => Self::NotFound,
            400..=499 => Self::Client { status, body },
            500..=599 => Self::Server { status, body },
            _ => Self::Protocol(format!("unexpected status {status}")),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(IngestError::from_status(404, String::new()), IngestError::NotFound));
        assert!(matches!(IngestError::from_status(410, String::new()), IngestError::NotFound));
        assert!(matches!(
            IngestError::from_status(413, "too large".into()),
            IngestError::Client { status: 413, .. }
        ));
        assert!(matches!(
            IngestError::from_status(503, String::new()),
            IngestError::Server { status: 503, .. }
        ));
        assert!(matches!(
            IngestError::from_status(302, String::new()),
            IngestError::Protocol(_)
        ));
    }
}
