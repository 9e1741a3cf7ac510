use thiserror::Error;

/// Why an inbound frame could not be turned into a message.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("binary frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("frame is not a JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame carries no data")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to persist settings: {0}")]
    Settings(#[source] anyhow::Error),
}
