use std::path::PathBuf;
use std::time::Duration;

use crate::DownloaderConfig;

/// Concurrency above which the origin tends to throttle harder than it helps.
pub const CONCURRENCY_ADVISORY_LIMIT: usize = 50;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// Base downloader configuration
    pub base: DownloaderConfig,
    pub playlist_config: HlsPlaylistConfig,
    pub scheduler_config: HlsSchedulerConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub decryption_config: HlsDecryptionConfig,
    pub output_config: HlsOutputConfig,
}

impl HlsConfig {
    pub fn builder() -> crate::protocol_builder::HlsConfigBuilder {
        crate::protocol_builder::HlsConfigBuilder::new()
    }
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPlaylistConfig {
    /// Master playlist location; `{token}` is replaced by the episode session token.
    pub master_url_template: String,
    pub playlist_fetch_timeout: Duration,
}

impl Default for HlsPlaylistConfig {
    fn default() -> Self {
        Self {
            master_url_template: "https://kwik.cx/stream/{token}/master.m3u8".to_string(),
            playlist_fetch_timeout: Duration::from_secs(15),
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct HlsSchedulerConfig {
    pub download_concurrency: usize, // Max segments in the Downloading state
}

impl Default for HlsSchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 5,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    pub segment_download_timeout: Duration,
    /// Total attempts per segment, the first one included.
    pub max_segment_attempts: u32,
    pub segment_retry_delay_base: Duration, // Base for exponential backoff, zero disables it
    pub key_download_timeout: Duration,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(30),
            max_segment_attempts: 3,
            segment_retry_delay_base: Duration::from_millis(250),
            key_download_timeout: Duration::from_secs(10),
        }
    }
}

/// IV used for AES-128 segments whose key directive declares none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum IvPolicy {
    /// All-zero IV, the legacy behaviour of the content host.
    #[default]
    Zero,
    /// Big-endian media sequence number, as RFC 8216 prescribes.
    MediaSequence,
}

// --- Decryption Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsDecryptionConfig {
    pub iv_policy: IvPolicy,
}

/// How finished segments become the output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AssemblyMode {
    /// Byte-level concatenation in playlist order.
    #[default]
    Concat,
    /// Stream-copy remux through ffmpeg's concat demuxer.
    Remux { ffmpeg: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct HlsOutputConfig {
    pub assembly_mode: AssemblyMode,
    /// Where per-episode work directories are created. Defaults to the output file's directory.
    pub work_dir: Option<PathBuf>,
}
