use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Download(#[from] hlsdl_engine::DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("no segment could be downloaded")]
    NothingDownloaded,

    #[error("ffmpeg failed: {0}")]
    Remux(String),
}
