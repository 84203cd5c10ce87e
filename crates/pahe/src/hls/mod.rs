// HLS episode acquisition: playlist resolution, keyed segment download and reassembly.

pub mod config;
pub mod coordinator;
pub mod decryption;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod hls_downloader;
pub mod media;
pub mod output;
pub mod playlist;
pub(crate) mod request;
pub mod scheduler;
pub mod segment;

// Re-exports for easier access
pub use config::{AssemblyMode, HlsConfig, IvPolicy};
pub use coordinator::{EpisodeCoordinator, EpisodeOutcome, EpisodeRequest};
pub use error::{HlsDownloaderError, NetworkErrorKind};
pub use events::{EpisodeEvent, EpisodeState, OnEpisodeEvent};
pub use hls_downloader::HlsDownloader;
pub use playlist::{ResolutionPreference, Variant, VariantPreference};
pub use segment::{Segment, SegmentResult, SegmentStatus};
