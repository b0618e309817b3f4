// HLS download engine: manifest model, key cache, segment stages and the session orchestrator.

pub mod config;
pub mod decryption;
mod downloader;
pub mod events;
pub mod key_cache;
pub mod manifest;
pub mod pipeline;
mod state;

pub use config::HlsConfig;
pub use decryption::{Aes128CbcDecryptor, ZERO_IV};
pub use downloader::{HlsDownloader, SegmentFailure, SessionReport};
pub use events::{HlsEvent, ProgressSnapshot};
pub use key_cache::KeyCache;
pub use manifest::{KeyMethod, KeyRef, M3u8Parser, Manifest, ManifestParser, Segment};
pub use pipeline::{ByteStage, SegmentPipeline};
