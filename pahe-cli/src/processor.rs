use pahe_engine::hls::{EpisodeOutcome, EpisodeRequest, HlsDownloader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ProgramConfig;
use crate::error::AppError;
use crate::utils::create_dirs;
use crate::utils::progress::ProgressManager;

/// Tally of one batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    /// Turns the tally into the process result.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.cancelled {
            return Err(AppError::Interrupted);
        }
        if self.failed > 0 {
            return Err(AppError::EpisodesFailed {
                failed: self.failed,
                total: self.total,
            });
        }
        Ok(())
    }
}

/// Downloads every token in order. A failed episode is logged and the batch
/// moves on; cancellation stops the batch after the running episode has cleaned up.
pub async fn process_episodes(
    tokens: &[String],
    config: &ProgramConfig,
    progress: &ProgressManager,
    cancel: CancellationToken,
) -> Result<BatchSummary, AppError> {
    if tokens.is_empty() {
        return Err(AppError::InvalidInput("No episode tokens provided".to_string()));
    }

    let downloader = HlsDownloader::new(config.hls_config.clone())?;
    if !config.link_only {
        create_dirs(&config.output_dir).await?;
    }

    let mut summary = BatchSummary {
        total: tokens.len(),
        ..Default::default()
    };
    info!(
        episodes = tokens.len(),
        series = config.naming.series(),
        output_dir = %config.output_dir.display(),
        "Starting batch of {} episode{}",
        tokens.len(),
        if tokens.len() == 1 { "" } else { "s" }
    );

    for (offset, token) in tokens.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let number = config.first_episode.saturating_add(offset as u32);
        let file_name = config
            .naming
            .file_name(number, token, &config.preference.resolution);
        let output_path = config.output_dir.join(&file_name);

        if !config.link_only && !config.overwrite && output_path.exists() {
            info!(episode = number, path = %output_path.display(), "Episode already exists, skipping");
            summary.skipped += 1;
            continue;
        }

        let request = EpisodeRequest {
            token: token.clone(),
            preference: config.preference.clone(),
            output_path,
            link_only: config.link_only,
        };

        match downloader
            .download_episode(request, progress.episode_callback(&file_name), cancel.clone())
            .await
        {
            Ok(EpisodeOutcome::Downloaded {
                path,
                segments,
                bytes,
            }) => {
                info!(episode = number, segments, bytes, path = %path.display(), "Episode saved");
                summary.succeeded += 1;
            }
            Ok(EpisodeOutcome::LinkOnly {
                variant,
                media_playlist_url,
                segments,
            }) => {
                info!(
                    episode = number,
                    resolution = ?variant.resolution,
                    segments,
                    "Media playlist resolved"
                );
                println!("{media_playlist_url}");
                summary.succeeded += 1;
            }
            Err(e) if e.is_cancelled() => {
                warn!(episode = number, token = %token, "Episode cancelled");
                summary.cancelled = true;
                break;
            }
            Err(e) => {
                error!(episode = number, token = %token, error = %e, "Episode failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Batch finished"
    );
    Ok(summary)
}
