use crate::DownloaderConfig;

/// Configuration for an HLS download session
#[derive(Debug, Clone)]
pub struct HlsConfig {
    /// HTTP settings shared by manifest, key and segment requests
    pub base: DownloaderConfig,

    /// Maximum number of segments downloaded at the same time
    pub max_concurrent: usize,

    /// Capacity of the event broadcast channel; slow subscribers lag past this
    pub event_capacity: usize,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            base: DownloaderConfig::default(),
            max_concurrent: 8,
            event_capacity: 1024,
        }
    }
}

impl HlsConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_base(mut self, base: DownloaderConfig) -> Self {
        self.base = base;
        self
    }
}
