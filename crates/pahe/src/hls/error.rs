use std::fmt;
use std::sync::Arc;

/// Sub-kind of a failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The origin rejected the request (401/403), usually a missing or wrong Referer.
    AccessDenied,
    /// Any other non-success status.
    Status(u16),
    Timeout,
    /// Connection, TLS or body transfer failure.
    Transport(String),
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkErrorKind::AccessDenied => write!(f, "access denied"),
            NetworkErrorKind::Status(code) => write!(f, "HTTP {code}"),
            NetworkErrorKind::Timeout => write!(f, "timed out"),
            NetworkErrorKind::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsDownloaderError {
    #[error("No variant matches the request: {0}")]
    VariantNotFound(String),
    #[error("Media playlist {url} lists no segments")]
    EmptyPlaylist { url: String },
    #[error("Playlist parse error: {0}")]
    ParseError(String),
    #[error("Failed to fetch key {uri}: {reason}")]
    KeyFetchError { uri: String, reason: String },
    #[error("Key from {uri} is {len} bytes long (expected 16)")]
    KeyFormatError { uri: String, len: usize },
    #[error("Network error for {url}: {kind}")]
    NetworkError { url: String, kind: NetworkErrorKind },
    #[error("Decryption error: {0}")]
    DecryptionError(String),
    #[error("Segment {index} failed after {attempts} attempts: {reason}")]
    SegmentExhausted {
        index: usize,
        attempts: u32,
        reason: String,
    },
    #[error("Assembly error: {0}")]
    AssemblyError(String),
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl HlsDownloaderError {
    /// Whether a segment attempt that ended with this error may be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HlsDownloaderError::NetworkError { .. } | HlsDownloaderError::DecryptionError(_)
        )
    }

    /// Short machine-friendly name of the failure class.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HlsDownloaderError::VariantNotFound(_) => "VariantNotFound",
            HlsDownloaderError::EmptyPlaylist { .. } => "EmptyPlaylist",
            HlsDownloaderError::ParseError(_) => "ParseError",
            HlsDownloaderError::KeyFetchError { .. } => "KeyFetchError",
            HlsDownloaderError::KeyFormatError { .. } => "KeyFormatError",
            HlsDownloaderError::NetworkError { .. } => "NetworkError",
            HlsDownloaderError::DecryptionError(_) => "DecryptionError",
            HlsDownloaderError::SegmentExhausted { .. } => "SegmentExhausted",
            HlsDownloaderError::AssemblyError(_) => "AssemblyError",
            HlsDownloaderError::IoError { .. } => "IoError",
            HlsDownloaderError::ConfigError(_) => "ConfigError",
            HlsDownloaderError::Cancelled => "Cancelled",
        }
    }
}

// Manual implementation of From<std::io::Error> for HlsDownloaderError
// because of the Arc wrapping.
impl From<std::io::Error> for HlsDownloaderError {
    fn from(err: std::io::Error) -> Self {
        HlsDownloaderError::IoError {
            source: Arc::new(err),
        }
    }
}
