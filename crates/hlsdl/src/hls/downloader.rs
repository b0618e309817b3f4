// HLS Downloader: runs one download session from manifest URL to ordered segment bytes.
//
// A session fetches and parses the manifest, submits one executor job per segment,
// and collects the outcomes by segment index. Each job opens the segment response,
// resolves its key through the session's KeyCache, and drives the body through the
// stage pipeline into a MemoryWriter. Segment failures are reported and recorded
// without aborting the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::buffer::{MemoryReader, MemoryWriter};
use crate::error::DownloadError;
use crate::executor::TaskExecutor;
use crate::hls::config::HlsConfig;
use crate::hls::decryption::Aes128CbcDecryptor;
use crate::hls::events::HlsEvent;
use crate::hls::key_cache::KeyCache;
use crate::hls::manifest::{KeyMethod, M3u8Parser, Manifest, ManifestParser, Segment};
use crate::hls::pipeline::SegmentPipeline;
use crate::hls::state::DownloadState;
use crate::http::{HttpClient, HttpError, RequestOptions};

/// Downloads HLS media playlists.
///
/// Every call to [`HlsDownloader::run`] is an independent session with its own
/// executor, key cache and counters. Events from all sessions are published on
/// one broadcast channel; see [`HlsDownloader::subscribe`].
pub struct HlsDownloader {
    config: HlsConfig,
    client: HttpClient,
    parser: Arc<dyn ManifestParser>,
    events: broadcast::Sender<HlsEvent>,
}

impl HlsDownloader {
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let client = HttpClient::from_config(&config.base)?;
        Ok(Self::with_client(config, client))
    }

    /// Use an existing client instead of building one from `config.base`.
    pub fn with_client(config: HlsConfig, client: HttpClient) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            client,
            parser: Arc::new(M3u8Parser),
            events,
        }
    }

    pub fn with_parser<P: ManifestParser + 'static>(mut self, parser: P) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HlsEvent> {
        self.events.subscribe()
    }

    pub async fn run(&self, manifest_url: &str) -> Result<SessionReport, DownloadError> {
        self.run_with_cancellation(manifest_url, CancellationToken::new())
            .await
    }

    /// Run a session that ends early with [`DownloadError::Cancelled`] once `token` fires.
    pub async fn run_with_cancellation(
        &self,
        manifest_url: &str,
        token: CancellationToken,
    ) -> Result<SessionReport, DownloadError> {
        let started = Instant::now();

        let (manifest, base_url) = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            loaded = self.load_manifest(manifest_url) => loaded?,
        };
        let total = manifest.len();
        let _ = self.events.send(HlsEvent::ManifestReady { segments: total });

        let executor = TaskExecutor::new(self.config.max_concurrent);
        let session = Arc::new(Session {
            state: Mutex::new(DownloadState::started_at(total, started)),
            keys: KeyCache::new(self.client.clone()),
            client: self.client.clone(),
            base_url,
            events: self.events.clone(),
        });

        let mut outcomes: FuturesUnordered<_> = manifest
            .segments
            .iter()
            .cloned()
            .enumerate()
            // Outcomes are keyed by playlist position; parsers may number segments differently.
            .map(|(index, segment)| {
                let session = Arc::clone(&session);
                let token = token.clone();
                let handle = executor.submit(move || async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(DownloadError::Cancelled),
                        result = session.download_segment(segment) => result,
                    }
                });
                async move { (index, handle.await) }
            })
            .collect();
        executor.start();
        debug!(
            segments = total,
            max_concurrent = executor.max_concurrency(),
            "Segment jobs submitted"
        );

        let mut segments: Vec<Option<Bytes>> = vec![None; total];
        let mut failures = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    session.stop(&executor);
                    info!("Download session cancelled");
                    return Err(DownloadError::Cancelled);
                }
                next = outcomes.next() => next,
            };
            let Some((index, outcome)) = next else {
                break;
            };

            match outcome.map_err(DownloadError::from) {
                Ok(bytes) => {
                    session.emit(HlsEvent::SegmentCompleted {
                        index,
                        bytes: bytes.clone(),
                    });
                    segments[index] = Some(bytes);
                }
                Err(error) => {
                    warn!(index, error = %error, "Segment failed");
                    session.emit(HlsEvent::SegmentFailed {
                        index,
                        error: error.to_string(),
                    });
                    failures.push(SegmentFailure { index, error });
                }
            }
        }

        session.stop(&executor);
        let elapsed = started.elapsed();
        session.emit(HlsEvent::SessionFinished { elapsed });

        failures.sort_by_key(|f| f.index);
        info!(
            segments = total,
            failed = failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Download session finished"
        );
        Ok(SessionReport {
            segments,
            failures,
            elapsed,
        })
    }

    async fn load_manifest(&self, manifest_url: &str) -> Result<(Manifest, Url), DownloadError> {
        let url = Url::parse(manifest_url)
            .map_err(|e| DownloadError::invalid_url(manifest_url, e.to_string()))?;

        let mut response = self
            .client
            .get(url.as_str(), RequestOptions::new())
            .await
            .map_err(DownloadError::download_failed)?;
        // Segment and key URIs are relative to where the manifest was actually served from.
        let base_url = response.url().clone();
        let text = response
            .text()
            .await
            .map_err(DownloadError::download_failed)?
            .unwrap_or_default();

        let manifest = self.parser.parse(&text)?;
        if manifest.is_empty() {
            return Err(DownloadError::parse("Invalid m3u8 list."));
        }
        info!(
            url = %base_url,
            segments = manifest.len(),
            encrypted = manifest.segments.iter().filter(|s| s.is_encrypted()).count(),
            duration_secs = manifest.total_duration().as_secs_f64(),
            "Manifest loaded"
        );
        Ok((manifest, base_url))
    }
}

/// State shared by the jobs of one session.
struct Session {
    state: Mutex<DownloadState>,
    keys: KeyCache,
    client: HttpClient,
    base_url: Url,
    events: broadcast::Sender<HlsEvent>,
}

impl Session {
    fn emit(&self, event: HlsEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn resolve(&self, uri: &str) -> Result<Url, DownloadError> {
        self.base_url
            .join(uri)
            .map_err(|e| DownloadError::invalid_url(uri, e.to_string()))
    }

    #[instrument(skip(self, segment), fields(index = segment.index, uri = %segment.uri))]
    async fn download_segment(self: Arc<Self>, segment: Segment) -> Result<Bytes, DownloadError> {
        let url = self.resolve(&segment.uri)?;
        let mut response = self.client.get(url.as_str(), RequestOptions::new()).await?;
        let Some(body) = response.stream() else {
            return Err(HttpError::connection("segment body already consumed").into());
        };

        let mut pipeline = SegmentPipeline::new();
        if let Some(key) = &segment.key {
            if key.method != KeyMethod::Aes128 {
                return Err(DownloadError::decryption(format!(
                    "unsupported encryption method {}",
                    key.method
                )));
            }
            let key_url = self.resolve(&key.uri)?;
            let key_bytes = self.keys.fetch_key(&key_url).await?;
            pipeline = pipeline.add_stage(Aes128CbcDecryptor::new(&key_bytes, key.iv)?);
        }

        let session = Arc::clone(&self);
        let tracked = body.inspect_ok(move |chunk| {
            let snapshot = session.state.lock().record_bytes(chunk.len());
            session.emit(HlsEvent::Progress(snapshot));
        });

        let mut sink = MemoryWriter::new();
        pipeline.run(tracked, &mut sink).await?;
        let bytes = sink.data().unwrap_or_default();

        let snapshot = self.state.lock().record_completed();
        self.emit(HlsEvent::Progress(snapshot));
        debug!(len = bytes.len(), "Segment downloaded");
        Ok(bytes)
    }

    fn stop(&self, executor: &TaskExecutor<Bytes, DownloadError>) {
        self.state.lock().reset(0);
        self.keys.clear();
        executor.stop(true);
    }
}

/// A segment that could not be downloaded.
#[derive(Debug)]
pub struct SegmentFailure {
    pub index: usize,
    pub error: DownloadError,
}

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    segments: Vec<Option<Bytes>>,
    failures: Vec<SegmentFailure>,
    elapsed: Duration,
}

impl SessionReport {
    /// Segment bytes in manifest order; `None` marks a failed segment.
    pub fn segments(&self) -> &[Option<Bytes>] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Bytes> {
        self.segments.get(index).and_then(Option::as_ref)
    }

    pub fn total(&self) -> usize {
        self.segments.len()
    }

    pub fn successful_indices(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Failed segments, ordered by index.
    pub fn failures(&self) -> &[SegmentFailure] {
        &self.failures
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.segments.iter().all(Option::is_some)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Decoded bytes across all successful segments.
    pub fn total_bytes(&self) -> usize {
        self.segments.iter().flatten().map(Bytes::len).sum()
    }

    /// Successful segments in manifest order, skipping gaps.
    pub fn into_segments(self) -> Vec<Bytes> {
        self.segments.into_iter().flatten().collect()
    }

    /// Replay the successful segments in manifest order, skipping gaps.
    pub fn into_reader(self) -> MemoryReader {
        MemoryReader::new(self.into_segments())
    }
}
