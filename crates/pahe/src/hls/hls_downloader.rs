use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hls::coordinator::{EpisodeCoordinator, EpisodeOutcome, EpisodeRequest};
use crate::hls::events::OnEpisodeEvent;
use crate::hls::playlist::{PlaylistResolver, Variant};
use crate::{DownloadError, create_client};

use super::HlsConfig;

pub struct HlsDownloader {
    client: Client,
    config: Arc<HlsConfig>,
}

impl HlsDownloader {
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        Self::with_config(config)
    }

    /// Create a new HlsDownloader with custom configuration
    pub fn with_config(config: HlsConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config.base)?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Lists the variants advertised for `token` without selecting one.
    pub async fn list_variants(&self, token: &str) -> Result<Vec<Variant>, DownloadError> {
        PlaylistResolver::new(self.client.clone(), Arc::clone(&self.config))
            .load_variants(token)
            .await
            .map_err(|source| DownloadError::Episode {
                token: token.to_string(),
                source,
            })
    }

    /// Downloads one episode. Every episode gets its own key cache and work directory.
    pub async fn download_episode(
        &self,
        request: EpisodeRequest,
        on_event: Option<OnEpisodeEvent>,
        cancel: CancellationToken,
    ) -> Result<EpisodeOutcome, DownloadError> {
        let token = request.token.clone();
        debug!(token = %token, output = %request.output_path.display(), "Episode requested");
        EpisodeCoordinator::new(Arc::clone(&self.config), self.client.clone(), on_event, cancel)
            .run(request)
            .await
            .map_err(|source| DownloadError::Episode { token, source })
    }
}
