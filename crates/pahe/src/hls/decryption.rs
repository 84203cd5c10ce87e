// HLS Key Resolver and segment decryption: single-flight key fetching per key URI
// plus AES-128-CBC decryption of segment payloads.

use crate::hls::HlsDownloaderError;
use crate::hls::config::{HlsConfig, IvPolicy};
use crate::hls::request::get_bytes;
use crate::hls::segment::{KeyContext, Segment};
use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use moka::future::Cache;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;
use url::Url;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// A resolved AES-128 key. Shared read-only by every segment referencing `uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub uri: Url,
    pub bytes: [u8; 16],
}

impl EncryptionKey {
    pub fn from_slice(uri: Url, data: &[u8]) -> Result<Self, HlsDownloaderError> {
        let bytes: [u8; 16] =
            data.try_into()
                .map_err(|_| HlsDownloaderError::KeyFormatError {
                    uri: uri.to_string(),
                    len: data.len(),
                })?;
        Ok(Self { uri, bytes })
    }
}

/// Where raw key bytes come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key(&self, uri: &Url) -> Result<Bytes, HlsDownloaderError>;
}

// --- KeyFetcher Struct ---
// Fetches raw key data over HTTP with the client's default headers.
pub struct KeyFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
}

impl KeyFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl KeySource for KeyFetcher {
    async fn fetch_key(&self, uri: &Url) -> Result<Bytes, HlsDownloaderError> {
        get_bytes(
            &self.http_client,
            uri,
            self.config.fetcher_config.key_download_timeout,
        )
        .await
        .map_err(|e| match e {
            HlsDownloaderError::NetworkError { kind, .. } => HlsDownloaderError::KeyFetchError {
                uri: uri.to_string(),
                reason: kind.to_string(),
            },
            other => other,
        })
    }
}

/// Episode-scoped key cache. Concurrent first requests for one URI share a
/// single fetch; failures are cached too, so a broken key URI is hit once.
pub struct KeyResolver {
    source: Arc<dyn KeySource>,
    cache: Cache<Url, Result<EncryptionKey, HlsDownloaderError>>,
}

impl KeyResolver {
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            cache: Cache::builder().build(),
        }
    }

    async fn fetch(
        source: Arc<dyn KeySource>,
        uri: Url,
    ) -> Result<EncryptionKey, HlsDownloaderError> {
        debug!(uri = %uri, "Fetching decryption key");
        let data = source.fetch_key(&uri).await?;
        EncryptionKey::from_slice(uri, &data)
    }

    pub async fn resolve(&self, uri: &Url) -> Result<EncryptionKey, HlsDownloaderError> {
        self.cache
            .get_with(
                uri.clone(),
                Self::fetch(Arc::clone(&self.source), uri.clone()),
            )
            .await
    }

    /// Resolves the key for a segment, `None` when it is not encrypted.
    pub async fn resolve_for(
        &self,
        context: Option<&KeyContext>,
    ) -> Result<Option<EncryptionKey>, HlsDownloaderError> {
        match context {
            Some(ctx) => self.resolve(&ctx.uri).await.map(Some),
            None => Ok(None),
        }
    }
}

/// IV for a segment: the declared one, otherwise derived per `policy`.
pub fn segment_iv(segment: &Segment, policy: IvPolicy) -> [u8; 16] {
    if let Some(iv) = segment.key.as_ref().and_then(|k| k.iv) {
        return iv;
    }
    match policy {
        IvPolicy::Zero => [0u8; 16],
        IvPolicy::MediaSequence => u128::from(segment.media_sequence).to_be_bytes(),
    }
}

/// AES-128-CBC with PKCS#7 padding.
pub fn decrypt_segment(
    data: &[u8],
    key: &EncryptionKey,
    iv: &[u8; 16],
) -> Result<Vec<u8>, HlsDownloaderError> {
    let mut buffer = data.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(&key.bytes, iv).map_err(|e| {
        HlsDownloaderError::DecryptionError(format!("Failed to initialize AES decryptor: {e}"))
    })?;

    let decrypted_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| HlsDownloaderError::DecryptionError(format!("Decryption failed: {e}")))?
        .len();
    buffer.truncate(decrypted_len);
    Ok(buffer)
}
