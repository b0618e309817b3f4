use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("connection failed: {reason}")]
    Connection { reason: String },

    /// Response status in `[400, 600)`; `body` holds the drained response text.
    #[error("{} | {body}", .status.as_u16())]
    Status { status: StatusCode, body: String },

    /// Declared `Content-Length` disagrees with the bytes actually received.
    #[error("Validate Content-Length failed: expected {expected} bytes, received {received}")]
    ContentMismatch { expected: u64, received: u64 },

    #[error("failed to decode {encoding} body: {reason}")]
    Decode {
        encoding: &'static str,
        reason: String,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("too many redirects ({count}) while requesting {url}")]
    TooManyRedirects { url: String, count: usize },

    #[error("invalid JSON body: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl HttpError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Numeric status code for status errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }

    pub fn is_content_mismatch(&self) -> bool {
        matches!(self, Self::ContentMismatch { .. })
    }
}
