// Shared GET helper: maps reqwest failures onto the engine's network taxonomy.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use crate::hls::HlsDownloaderError;
use crate::hls::error::NetworkErrorKind;

fn network_error(url: &Url, kind: NetworkErrorKind) -> HlsDownloaderError {
    HlsDownloaderError::NetworkError {
        url: url.to_string(),
        kind,
    }
}

fn classify(url: &Url, err: reqwest::Error) -> HlsDownloaderError {
    if err.is_timeout() {
        network_error(url, NetworkErrorKind::Timeout)
    } else {
        network_error(url, NetworkErrorKind::Transport(err.to_string()))
    }
}

/// Issues a GET and returns the whole body. The client's default headers
/// (Referer included) are attached to every request.
pub(crate) async fn get_bytes(
    client: &Client,
    url: &Url,
    timeout: Duration,
) -> Result<Bytes, HlsDownloaderError> {
    let mut request = client.get(url.clone());
    if !timeout.is_zero() {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| classify(url, e))?;
    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(network_error(url, NetworkErrorKind::AccessDenied));
    }
    if !status.is_success() {
        return Err(network_error(url, NetworkErrorKind::Status(status.as_u16())));
    }

    let body = response.bytes().await.map_err(|e| classify(url, e))?;
    trace!(url = %url, len = body.len(), "GET complete");
    Ok(body)
}

/// Same as [`get_bytes`], decoding the body as UTF-8 text.
pub(crate) async fn get_text(
    client: &Client,
    url: &Url,
    timeout: Duration,
) -> Result<String, HlsDownloaderError> {
    let body = get_bytes(client, url, timeout).await?;
    String::from_utf8(body.to_vec()).map_err(|e| {
        HlsDownloaderError::ParseError(format!("Playlist {url} is not valid UTF-8: {e}"))
    })
}
