mod files;
mod headers;
pub mod progress;

// Export utility functions
pub use self::files::{EpisodeNaming, create_dirs, output_extension};
pub use self::headers::parse_headers;
