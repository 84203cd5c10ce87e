use std::path::PathBuf;

use pahe_engine::hls::{HlsConfig, VariantPreference};

use crate::utils::EpisodeNaming;

/// Configuration for the entire program
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Engine configuration shared by every episode
    pub hls_config: HlsConfig,

    /// Directory receiving the assembled episodes
    pub output_dir: PathBuf,

    /// Output file naming
    pub naming: EpisodeNaming,

    /// Variant wanted for every episode of the batch
    pub preference: VariantPreference,

    /// Number given to the first token
    pub first_episode: u32,

    /// Print media playlist URLs instead of downloading
    pub link_only: bool,

    /// Replace episodes that already exist in the output directory
    pub overwrite: bool,
}
