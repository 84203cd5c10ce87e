// HLS Episode Coordinator: drives one episode through resolution, parsing,
// download and assembly as a single-pass state machine.

use crate::hls::HlsDownloaderError;
use crate::hls::config::{CONCURRENCY_ADVISORY_LIMIT, HlsConfig};
use crate::hls::decryption::{KeyFetcher, KeyResolver, KeySource};
use crate::hls::events::{EpisodeEvent, EpisodeState, OnEpisodeEvent};
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::media::MediaPlaylistParser;
use crate::hls::output::Assembler;
use crate::hls::playlist::{PlaylistResolver, Variant, VariantPreference};
use crate::hls::scheduler::SegmentScheduler;
use crate::hls::segment::{Segment, SegmentResult};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// What the caller wants done for one episode.
#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub token: String,
    pub preference: VariantPreference,
    pub output_path: PathBuf,
    /// Stop after parsing and report the media playlist URL.
    pub link_only: bool,
}

#[derive(Debug, Clone)]
pub enum EpisodeOutcome {
    Downloaded {
        path: PathBuf,
        segments: usize,
        bytes: u64,
    },
    LinkOnly {
        variant: Variant,
        media_playlist_url: Url,
        segments: usize,
    },
}

/// State owned by one coordinator run. Dropping it removes the work directory.
pub struct EpisodeJob {
    pub token: String,
    pub variant: Variant,
    pub segments: Vec<Segment>,
    pub results: Vec<SegmentResult>,
    pub output_path: PathBuf,
    work_dir: TempDir,
}

impl EpisodeJob {
    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }
}

pub struct EpisodeCoordinator {
    config: Arc<HlsConfig>,
    playlist_resolver: PlaylistResolver,
    media_parser: MediaPlaylistParser,
    segment_fetcher: Arc<dyn SegmentDownloader>,
    key_source: Arc<dyn KeySource>,
    on_event: Option<OnEpisodeEvent>,
    cancel: CancellationToken,
    state: EpisodeState,
}

impl EpisodeCoordinator {
    pub fn new(
        config: Arc<HlsConfig>,
        http_client: Client,
        on_event: Option<OnEpisodeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let segment_fetcher: Arc<dyn SegmentDownloader> = Arc::new(SegmentFetcher::new(
            http_client.clone(),
            Arc::clone(&config),
        ));
        let key_source: Arc<dyn KeySource> =
            Arc::new(KeyFetcher::new(http_client.clone(), Arc::clone(&config)));
        Self {
            playlist_resolver: PlaylistResolver::new(http_client.clone(), Arc::clone(&config)),
            media_parser: MediaPlaylistParser::new(http_client, Arc::clone(&config)),
            segment_fetcher,
            key_source,
            config,
            on_event,
            cancel,
            state: EpisodeState::ResolvingVariant,
        }
    }

    pub fn state(&self) -> &EpisodeState {
        &self.state
    }

    fn emit(&self, event: EpisodeEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }

    fn transition(&mut self, token: &str, next: EpisodeState) {
        if !self.state.can_transition_to(&next) {
            warn!(token, from = %self.state, to = %next, "Ignoring invalid episode state transition");
            return;
        }
        debug!(token, from = %self.state, to = %next, "Episode state changed");
        self.state = next;
        self.emit(EpisodeEvent::StateChanged {
            token: token.to_string(),
            state: self.state.clone(),
        });
    }

    fn check_cancelled(&self) -> Result<(), HlsDownloaderError> {
        if self.cancel.is_cancelled() {
            return Err(HlsDownloaderError::Cancelled);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), HlsDownloaderError> {
        let concurrency = self.config.scheduler_config.download_concurrency;
        if concurrency == 0 {
            return Err(HlsDownloaderError::ConfigError(
                "download concurrency must be at least 1".to_string(),
            ));
        }
        if concurrency > CONCURRENCY_ADVISORY_LIMIT {
            warn!(
                concurrency,
                advised = CONCURRENCY_ADVISORY_LIMIT,
                "High segment concurrency; the origin throttles aggressively and failures become more likely"
            );
        }
        Ok(())
    }

    async fn create_work_dir(&self, output_path: &Path) -> Result<TempDir, HlsDownloaderError> {
        let parent = match &self.config.output_config.work_dir {
            Some(dir) => dir.clone(),
            None => output_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        tokio::fs::create_dir_all(&parent).await?;
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".pahe-episode-")
                .tempdir_in(&parent)
        })
        .await
        .map_err(std::io::Error::other)??;
        debug!(path = %dir.path().display(), "Created episode work directory");
        Ok(dir)
    }

    async fn drive(&mut self, request: &EpisodeRequest) -> Result<EpisodeOutcome, HlsDownloaderError> {
        let token = request.token.as_str();
        self.validate()?;
        self.emit(EpisodeEvent::StateChanged {
            token: token.to_string(),
            state: self.state.clone(),
        });

        self.check_cancelled()?;
        let variant = self
            .playlist_resolver
            .resolve(token, &request.preference)
            .await?;
        self.emit(EpisodeEvent::VariantSelected {
            resolution: variant.resolution,
            audio_language: variant.audio_language.clone(),
            media_playlist_url: variant.media_playlist_url.clone(),
        });

        self.transition(token, EpisodeState::ParsingPlaylist);
        self.check_cancelled()?;
        let segments = self
            .media_parser
            .load_segments(&variant.media_playlist_url)
            .await?;
        self.emit(EpisodeEvent::SegmentsDiscovered {
            total: segments.len(),
        });

        if request.link_only {
            let media_playlist_url = variant.media_playlist_url.clone();
            return Ok(EpisodeOutcome::LinkOnly {
                variant,
                media_playlist_url,
                segments: segments.len(),
            });
        }

        self.transition(token, EpisodeState::Downloading);
        self.check_cancelled()?;
        let mut job = EpisodeJob {
            token: token.to_string(),
            variant,
            results: Vec::new(),
            segments,
            output_path: request.output_path.clone(),
            work_dir: self.create_work_dir(&request.output_path).await?,
        };

        // Keys live exactly as long as this job.
        let key_resolver = Arc::new(KeyResolver::new(Arc::clone(&self.key_source)));
        let scheduler = SegmentScheduler::new(
            Arc::clone(&self.config),
            Arc::clone(&self.segment_fetcher),
            key_resolver,
            job.work_dir().to_path_buf(),
            self.on_event.clone(),
            self.cancel.clone(),
        );
        job.results = scheduler.run(&job.segments).await?;

        self.transition(token, EpisodeState::Assembling);
        let bytes = Assembler::new(&self.config.output_config)
            .assemble(&job.results, job.work_dir(), &job.output_path)
            .await?;

        let EpisodeJob {
            output_path,
            results,
            work_dir,
            ..
        } = job;
        if let Err(e) = work_dir.close() {
            warn!(token, error = %e, "Failed to remove episode work directory");
        }
        Ok(EpisodeOutcome::Downloaded {
            path: output_path,
            segments: results.len(),
            bytes,
        })
    }

    /// Runs the episode to `Done` or `Failed`. A failed run leaves neither an
    /// output file nor its work directory behind.
    pub async fn run(mut self, request: EpisodeRequest) -> Result<EpisodeOutcome, HlsDownloaderError> {
        info!(token = %request.token, preference = %request.preference.resolution, "Starting episode");
        match self.drive(&request).await {
            Ok(outcome) => {
                self.transition(&request.token, EpisodeState::Done);
                Ok(outcome)
            }
            Err(e) => {
                error!(token = %request.token, state = %self.state, error = %e, "Episode failed");
                self.transition(&request.token, EpisodeState::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}
