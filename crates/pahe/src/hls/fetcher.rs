// HLS Segment Fetcher: raw download of individual media segments.

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::request::get_bytes;
use crate::hls::segment::Segment;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use tracing::trace;

/// One download attempt for a segment. Retries are owned by the pool.
#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn download_segment(&self, segment: &Segment) -> Result<Bytes, HlsDownloaderError>;
}

pub struct SegmentFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
}

impl SegmentFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn download_segment(&self, segment: &Segment) -> Result<Bytes, HlsDownloaderError> {
        let data = get_bytes(
            &self.http_client,
            &segment.uri,
            self.config.fetcher_config.segment_download_timeout,
        )
        .await?;
        trace!(index = segment.index, len = data.len(), "Downloaded segment");
        Ok(data)
    }
}
