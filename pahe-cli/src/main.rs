use std::time::Duration;

use clap::Parser;
use config::ProgramConfig;
use error::AppError;
use indicatif::MultiProgress;
use pahe_engine::hls::{AssemblyMode, HlsConfig, IvPolicy, VariantPreference};
use pahe_engine::{DownloaderConfig, HlsConfigBuilder, ProxyConfig};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

mod cli;
mod config;
mod error;
mod processor;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;
use utils::{EpisodeNaming, output_extension, parse_headers};

const LOG_FILE_NAME: &str = "pahe.log";

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        let code = match e {
            AppError::Interrupted => 130,
            _ => 1,
        };
        std::process::exit(code);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    std::fs::create_dir_all(&args.output_dir)?;
    let _log_guard = init_logging(&args)?;

    info!(
        "pahe {} - episode HLS downloader",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s, playlist={}s, segment={}s, key={}s",
        args.timeout,
        args.connect_timeout,
        args.read_timeout,
        args.playlist_timeout,
        args.segment_timeout,
        args.key_timeout
    );

    let hls_config = build_hls_config(&args)?;
    let extension = output_extension(&hls_config.output_config.assembly_mode);
    let last_episode = args
        .first_episode
        .saturating_add(args.tokens.len().saturating_sub(1) as u32);

    let program_config = ProgramConfig {
        hls_config,
        output_dir: args.output_dir.clone(),
        naming: EpisodeNaming::new(
            args.series.as_deref(),
            args.name_template.clone(),
            last_episode,
            extension,
        ),
        preference: VariantPreference {
            resolution: args.resolution,
            audio_language: args.audio.clone(),
        },
        first_episode: args.first_episode,
        link_only: args.link_only,
        overwrite: args.force,
    };

    // Create a progress manager based on show_progress flag
    let multi = MultiProgress::new();
    let progress_manager = if args.show_progress && !args.link_only {
        ProgressManager::new(multi)
    } else {
        ProgressManager::new_disabled(multi)
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    processor::process_episodes(&args.tokens, &program_config, &progress_manager, cancel)
        .await?
        .into_result()
}

/// Installs the subscriber: stderr output plus a plain-text copy in the output directory.
fn init_logging(args: &CliArgs) -> Result<WorkerGuard, AppError> {
    let filter = || {
        if args.quiet {
            EnvFilter::new("error")
        } else if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::from_default_env().add_directive(Level::INFO.into())
        }
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(&args.output_dir)
        .map_err(|e| AppError::Initialization(format!("log file: {e}")))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter()),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter()),
        )
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    Ok(guard)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after cleanup");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });
}

fn build_download_config(args: &CliArgs) -> Result<DownloaderConfig, AppError> {
    // Custom headers override the defaults of the same name.
    let mut headers = DownloaderConfig::get_default_headers();
    headers.extend(parse_headers(&args.headers)?);

    let mut builder = DownloaderConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_referer(args.referer.clone())
        .with_headers(headers);

    // Handle proxy configuration
    builder = if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        builder.with_system_proxy(false)
    } else if let Some(proxy_url) = args.proxy.as_ref() {
        let mut proxy = ProxyConfig::new(proxy_url.clone(), args.proxy_type);
        if let (Some(username), Some(password)) = (&args.proxy_user, &args.proxy_pass) {
            proxy = proxy.with_auth(username.clone(), password.clone());
        }
        info!(
            proxy_url = %proxy_url,
            proxy_type = ?args.proxy_type,
            has_auth = proxy.auth.is_some(),
            "Using explicit proxy configuration for downloads"
        );
        builder.with_proxy(proxy)
    } else {
        builder.with_system_proxy(true)
    };

    Ok(builder.build())
}

fn build_hls_config(args: &CliArgs) -> Result<HlsConfig, AppError> {
    let mut builder = HlsConfigBuilder::new()
        .with_base_config(build_download_config(args)?)
        .download_concurrency(args.threads)
        .max_segment_attempts(args.retries.saturating_add(1))
        .playlist_fetch_timeout(Duration::from_secs(args.playlist_timeout))
        .segment_download_timeout(Duration::from_secs(args.segment_timeout))
        .key_download_timeout(Duration::from_secs(args.key_timeout));

    if let Some(template) = &args.playlist_template {
        builder = builder.master_url_template(template.clone());
    }
    if args.iv_from_sequence {
        builder = builder.iv_policy(IvPolicy::MediaSequence);
    }
    if args.remux {
        builder = builder.assembly_mode(AssemblyMode::Remux {
            ffmpeg: args.ffmpeg.clone(),
        });
    }

    Ok(builder.build_config()?)
}
