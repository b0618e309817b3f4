// HLS Key Cache: deduplicates key fetches across concurrently downloading segments.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::error::DownloadError;
use crate::http::{HttpClient, RequestOptions};

type KeyFuture = Shared<BoxFuture<'static, Result<Bytes, Arc<DownloadError>>>>;

enum Entry {
    InFlight { generation: u64, future: KeyFuture },
    Ready(Bytes),
}

/// Cache of key bytes by absolute key URL.
///
/// At most one fetch per URL is outstanding; concurrent callers await the same
/// shared future. Failures are never cached.
pub struct KeyCache {
    client: HttpClient,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    next_generation: AtomicU64,
    fetches: AtomicUsize,
}

impl KeyCache {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub async fn fetch_key(&self, url: &Url) -> Result<Bytes, DownloadError> {
        let key = url.as_str().to_owned();
        let future = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(Entry::Ready(bytes)) => {
                    trace!(url = %url, "Key cache hit");
                    return Ok(bytes.clone());
                }
                Some(Entry::InFlight { future, .. }) => {
                    trace!(url = %url, "Joining in-flight key fetch");
                    future.clone()
                }
                None => {
                    let (generation, future) = self.start_fetch(url.clone());
                    entries.insert(
                        key,
                        Entry::InFlight {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await.map_err(|source| DownloadError::KeyFetch {
            url: url.to_string(),
            source,
        })
    }

    fn start_fetch(&self, url: Url) -> (u64, KeyFuture) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, generation, "Fetching key");

        let client = self.client.clone();
        let entries = Arc::clone(&self.entries);
        let future = async move {
            let result = fetch(&client, &url).await.map_err(Arc::new);

            let mut entries = entries.lock();
            let owned = matches!(
                entries.get(url.as_str()),
                Some(Entry::InFlight { generation: g, .. }) if *g == generation
            );
            if owned {
                match &result {
                    Ok(bytes) => {
                        entries.insert(url.to_string(), Entry::Ready(bytes.clone()));
                    }
                    Err(e) => {
                        debug!(url = %url, error = %e, "Key fetch failed, not caching");
                        entries.remove(url.as_str());
                    }
                }
            }
            result
        }
        .boxed()
        .shared();

        (generation, future)
    }

    /// Drop every entry. Fetches still in flight complete for their callers but
    /// are not stored.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of key fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

async fn fetch(client: &HttpClient, url: &Url) -> Result<Bytes, DownloadError> {
    let mut response = client.get(url.as_str(), RequestOptions::new()).await?;
    Ok(response.body().await?.unwrap_or_default())
}
