use std::sync::Arc;

use crate::executor::JobError;
use crate::http::HttpError;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    /// The job was dropped by the executor before it settled.
    #[error("job discarded before completion")]
    Discarded,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error(transparent)]
    Http(#[from] HttpError),

    /// Fetching the manifest itself failed; the session cannot proceed.
    #[error("download failed, {source}")]
    DownloadFailed { source: HttpError },

    #[error("parse failed, {reason}")]
    Parse { reason: String },

    /// Key fetch failure, shared by every segment that waited on the same fetch.
    #[error("failed to fetch key {url}: {source}")]
    KeyFetch {
        url: String,
        #[source]
        source: Arc<DownloadError>,
    },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    pub fn download_failed(source: HttpError) -> Self {
        Self::DownloadFailed { source }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http(e) | Self::DownloadFailed { source: e } => e.status_code(),
            Self::KeyFetch { source, .. } => source.status_code(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<JobError<DownloadError>> for DownloadError {
    fn from(err: JobError<DownloadError>) -> Self {
        match err {
            JobError::Failed(e) => e,
            JobError::Discarded => Self::Discarded,
        }
    }
}
