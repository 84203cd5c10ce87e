//! # Pahe engine
//!
//! Downloads one episode of a series from an HLS source into a single file.
//!
//! ## Features
//!
//! - Variant selection by resolution and audio language
//! - AES-128 segment decryption with one key fetch per key URI
//! - Bounded concurrent segment download with retry
//! - Ordered reassembly by byte concatenation or ffmpeg stream copy

pub mod builder;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod protocol_builder;
pub mod proxy;

pub use builder::DownloaderConfigBuilder;
pub use config::DownloaderConfig;
pub use error::DownloadError;

// Re-export protocol builders
pub use protocol_builder::{HlsConfigBuilder, ProtocolBuilder};

// Re-export downloader utilities
pub use downloader::create_client;

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
