//! # Protocol Builders
//!
//! Fluent builder for the HLS episode downloader and its configuration.

use crate::{
    DownloadError, DownloaderConfig,
    hls::{
        HlsDownloader,
        config::{AssemblyMode, HlsConfig, IvPolicy},
    },
    proxy::ProxyConfig,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use std::{str::FromStr, time::Duration};

/// Generic protocol builder trait
pub trait ProtocolBuilder {
    /// The protocol implementation type being built
    type Protocol;

    /// Build the protocol implementation
    fn build(self) -> Result<Self::Protocol, DownloadError>;
}

/// Builder for HLS episode downloaders
pub struct HlsConfigBuilder {
    config: HlsConfig,
}

impl HlsConfigBuilder {
    /// Create a new HLS builder with default configuration
    pub fn new() -> Self {
        Self {
            config: HlsConfig::default(),
        }
    }

    /// Set base downloader configuration
    pub fn with_base_config(mut self, base_config: DownloaderConfig) -> Self {
        self.config.base = base_config;
        self
    }

    // --- HTTP Client Settings (via base config) ---

    /// Set user agent for HTTP requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.base.user_agent = user_agent.into();
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.base.connect_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.base.read_timeout = timeout;
        self
    }

    /// Set the Referer sent with every request
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.config.base.referer = Some(referer.into());
        self
    }

    /// Set HTTP headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.config.base.headers = headers;
        self
    }

    /// Add a single HTTP header; invalid names or values are ignored
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.config.base.headers.insert(name, value);
        }
        self
    }

    /// Set proxy configuration
    pub fn proxy(mut self, proxy_config: ProxyConfig) -> Self {
        self.config.base.proxy = Some(proxy_config);
        self.config.base.use_system_proxy = false;
        self
    }

    /// Set whether to use system proxy
    pub fn use_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.base.proxy.is_none() {
            self.config.base.use_system_proxy = use_system_proxy;
        }
        self
    }

    // --- Playlist ---

    /// Master playlist URL template; `{token}` is replaced by the episode token
    pub fn master_url_template(mut self, template: impl Into<String>) -> Self {
        self.config.playlist_config.master_url_template = template.into();
        self
    }

    pub fn playlist_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.playlist_config.playlist_fetch_timeout = timeout;
        self
    }

    // --- Scheduler and fetcher ---

    /// Maximum number of segments downloading at once
    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scheduler_config.download_concurrency = concurrency;
        self
    }

    pub fn segment_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetcher_config.segment_download_timeout = timeout;
        self
    }

    /// Total attempts per segment, the first one included
    pub fn max_segment_attempts(mut self, attempts: u32) -> Self {
        self.config.fetcher_config.max_segment_attempts = attempts;
        self
    }

    pub fn segment_retry_delay_base(mut self, delay: Duration) -> Self {
        self.config.fetcher_config.segment_retry_delay_base = delay;
        self
    }

    pub fn key_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetcher_config.key_download_timeout = timeout;
        self
    }

    // --- Decryption and output ---

    pub fn iv_policy(mut self, policy: IvPolicy) -> Self {
        self.config.decryption_config.iv_policy = policy;
        self
    }

    pub fn assembly_mode(mut self, mode: AssemblyMode) -> Self {
        self.config.output_config.assembly_mode = mode;
        self
    }

    /// Directory under which per-episode work directories are created
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_config.work_dir = Some(dir.into());
        self
    }

    /// Configure with a custom function
    pub fn with_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut HlsConfig),
    {
        f(&mut self.config);
        self
    }

    /// Get the current configuration
    pub fn get_config(&self) -> HlsConfig {
        self.config.clone()
    }

    fn validate(&self) -> Result<(), DownloadError> {
        if self.config.scheduler_config.download_concurrency == 0 {
            return Err(DownloadError::ConfigError(
                "download concurrency must be at least 1".to_string(),
            ));
        }
        if self.config.fetcher_config.max_segment_attempts == 0 {
            return Err(DownloadError::ConfigError(
                "segment attempts must be at least 1".to_string(),
            ));
        }
        let template = &self.config.playlist_config.master_url_template;
        if !template.contains("{token}") {
            return Err(DownloadError::ConfigError(format!(
                "master playlist template {template:?} has no {{token}} placeholder"
            )));
        }
        Ok(())
    }

    /// Validate and return the configuration without building a client
    pub fn build_config(self) -> Result<HlsConfig, DownloadError> {
        self.validate()?;
        Ok(self.config)
    }
}

impl ProtocolBuilder for HlsConfigBuilder {
    type Protocol = HlsDownloader;

    fn build(self) -> Result<Self::Protocol, DownloadError> {
        HlsDownloader::new(self.build_config()?)
    }
}

impl Default for HlsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
