use crate::hls::HlsDownloaderError;

// Custom error type for download operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("TLS setup failed: {0}")]
    TlsError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("HLS error: {0}")]
    HlsError(#[from] HlsDownloaderError),

    #[error("Episode {token} failed: {source}")]
    Episode {
        token: String,
        #[source]
        source: HlsDownloaderError,
    },
}

impl DownloadError {
    /// The pipeline failure behind this error, if any.
    pub fn hls_error(&self) -> Option<&HlsDownloaderError> {
        match self {
            DownloadError::HlsError(e) | DownloadError::Episode { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.hls_error(), Some(HlsDownloaderError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_error_carries_token_and_kind() {
        let err = DownloadError::Episode {
            token: "abc123".into(),
            source: HlsDownloaderError::VariantNotFound("resolution 480".into()),
        };
        let message = err.to_string();
        assert!(message.contains("abc123"));
        assert!(message.contains("480"));
        assert_eq!(err.hls_error().map(|e| e.kind_name()), Some("VariantNotFound"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_detection() {
        let err = DownloadError::from(HlsDownloaderError::Cancelled);
        assert!(err.is_cancelled());
        assert!(DownloadError::ProxyError("bad".into()).hls_error().is_none());
    }
}
