//! # hlsdl-engine
//!
//! Download engine for segmented HLS media playlists.
//!
//! The engine fetches a media playlist, downloads every segment with a bounded
//! number of concurrent transfers, decrypts AES-128 protected segments on the fly
//! and hands back the segment bytes ordered by their position in the playlist.
//!
//! ## Building blocks
//!
//! - [`TaskExecutor`]: bounded-concurrency job executor with a pending queue
//! - [`HttpClient`]: streaming HTTP client with transfer decoding and
//!   `Content-Length` validation over a pluggable [`Transport`]
//! - [`HlsDownloader`]: the session orchestrator publishing [`HlsEvent`]s
//! - [`MemoryWriter`] / [`MemoryReader`]: in-memory byte sink and replay source
//!
//! ## License
//!
//! MIT OR Apache-2.0

pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod hls;
pub mod http;

#[cfg(test)]
pub(crate) mod test_utils;

pub use buffer::{MemoryReader, MemoryWriter};
pub use config::{DEFAULT_USER_AGENT, DownloaderConfig};
pub use error::DownloadError;
pub use executor::{JobError, JobHandle, JobId, TaskExecutor};
pub use hls::{
    HlsConfig, HlsDownloader, HlsEvent, KeyCache, KeyRef, M3u8Parser, Manifest, ManifestParser,
    ProgressSnapshot, Segment, SessionReport,
};
pub use http::{
    HttpClient, HttpError, RequestOptions, ReqwestTransport, Response, Transport,
    TransportRequest, TransportResponse,
};
