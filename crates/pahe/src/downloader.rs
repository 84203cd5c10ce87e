use reqwest::Client;
use reqwest::header::{HeaderValue, REFERER};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::DownloaderConfig;
use crate::{DownloadError, proxy::build_proxy_from_config};

/// Create a reqwest Client with the provided configuration. The configured
/// Referer becomes a default header, so every request carries it.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut headers = config.headers.clone();
    if let Some(referer) = &config.referer {
        let value = HeaderValue::from_str(referer)
            .map_err(|e| DownloadError::ConfigError(format!("Invalid referer {referer:?}: {e}")))?;
        headers.insert(REFERER, value);
    }

    let proxy = config
        .proxy
        .as_ref()
        .map(build_proxy_from_config)
        .transpose()
        .map_err(DownloadError::ProxyError)?;

    // Create the crypto provider
    let provider = Arc::new(ring::default_provider());

    // Build platform default TLS configuration
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::TlsError(format!("protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| DownloadError::TlsError(format!("platform verifier: {e}")))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to same host
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    // Set up proxy configuration
    if let (Some(proxy), Some(proxy_config)) = (proxy, &config.proxy) {
        // Explicit proxy configuration takes precedence
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest will use system proxy settings by default when we don't call no_proxy()
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProxyType;
    use crate::proxy::ProxyConfig;

    #[test]
    fn test_invalid_referer_is_rejected() {
        let config = DownloaderConfig::builder()
            .with_referer("bad\nreferer")
            .with_system_proxy(false)
            .build();
        assert!(matches!(
            create_client(&config),
            Err(DownloadError::ConfigError(_))
        ));
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = DownloaderConfig::builder()
            .with_proxy(ProxyConfig {
                url: "not a url".to_string(),
                proxy_type: ProxyType::Http,
                auth: None,
            })
            .build();
        assert!(matches!(
            create_client(&config),
            Err(DownloadError::ProxyError(_))
        ));
    }
}
