// HLS Media Playlist Parser: turns a variant's media playlist into ordered segments.

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::request::get_text;
use crate::hls::segment::{KeyContext, Segment};
use m3u8_rs::{ExtTag, Key, KeyMethod, MediaPlaylist, parse_playlist_res};
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Parses an `IV` attribute (`0x` + 32 hex digits).
pub fn parse_iv(iv_hex_str: &str) -> Result<[u8; 16], HlsDownloaderError> {
    let iv_str = iv_hex_str
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv_bytes = [0u8; 16];
    hex::decode_to_slice(iv_str, &mut iv_bytes).map_err(|e| {
        HlsDownloaderError::ParseError(format!("Failed to parse IV '{iv_hex_str}': {e}"))
    })?;
    Ok(iv_bytes)
}

// Applies one EXT-X-KEY directive to the running key context.
fn apply_key_directive(
    key: &Key,
    playlist_url: &Url,
) -> Result<Option<KeyContext>, HlsDownloaderError> {
    match &key.method {
        KeyMethod::None => Ok(None),
        KeyMethod::AES128 => {
            let uri = key.uri.as_deref().ok_or_else(|| {
                HlsDownloaderError::ParseError(format!(
                    "AES-128 key directive without URI in {playlist_url}"
                ))
            })?;
            let uri = playlist_url.join(uri).map_err(|e| {
                HlsDownloaderError::ParseError(format!(
                    "Could not join playlist URL with key URI {uri}: {e}"
                ))
            })?;
            let iv = key.iv.as_deref().map(parse_iv).transpose()?;
            Ok(Some(KeyContext { uri, iv }))
        }
        other => Err(HlsDownloaderError::ParseError(format!(
            "Unsupported encryption method {other:?} in {playlist_url}"
        ))),
    }
}

// m3u8-rs rejects `METHOD=NONE` without an IV and keeps the line as an
// unknown `X-KEY` tag on the following segment.
fn unparsed_key_directive(
    tags: &[ExtTag],
    playlist_url: &Url,
) -> Result<bool, HlsDownloaderError> {
    let Some(tag) = tags.iter().rev().find(|t| t.tag == "X-KEY") else {
        return Ok(false);
    };
    let attributes = tag.rest.as_deref().unwrap_or_default();
    let method = attributes.split(',').find_map(|attribute| {
        let (name, value) = attribute.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("METHOD")
            .then_some(value.trim().trim_matches('"'))
    });
    match method {
        Some(method) if method.eq_ignore_ascii_case("NONE") => Ok(true),
        _ => Err(HlsDownloaderError::ParseError(format!(
            "Malformed key directive '{attributes}' in {playlist_url}"
        ))),
    }
}

/// Folds the segments of a parsed media playlist, carrying the active key
/// context forward until a new key directive replaces or clears it.
pub fn collect_segments(
    playlist: &MediaPlaylist,
    playlist_url: &Url,
) -> Result<Vec<Segment>, HlsDownloaderError> {
    let (segments, _) = playlist.segments.iter().enumerate().try_fold(
        (Vec::with_capacity(playlist.segments.len()), None::<KeyContext>),
        |(mut segments, current_key), (index, media_segment)| {
            let key = match &media_segment.key {
                Some(directive) => apply_key_directive(directive, playlist_url)?,
                None if unparsed_key_directive(&media_segment.unknown_tags, playlist_url)? => None,
                None => current_key,
            };
            let uri = playlist_url.join(&media_segment.uri).map_err(|e| {
                HlsDownloaderError::ParseError(format!(
                    "Could not join playlist URL with segment URI {}: {e}",
                    media_segment.uri
                ))
            })?;
            segments.push(Segment {
                index,
                uri,
                key: key.clone(),
                media_sequence: playlist.media_sequence + index as u64,
                duration: media_segment.duration,
            });
            Ok::<_, HlsDownloaderError>((segments, key))
        },
    )?;
    Ok(segments)
}

/// Parses raw media playlist bytes into segments.
pub fn parse_media_playlist(
    content: &[u8],
    playlist_url: &Url,
) -> Result<Vec<Segment>, HlsDownloaderError> {
    let playlist = match parse_playlist_res(content) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => pl,
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => {
            return Err(HlsDownloaderError::ParseError(format!(
                "Expected Media Playlist, got Master for {playlist_url}"
            )));
        }
        Err(e) => {
            return Err(HlsDownloaderError::ParseError(format!(
                "Failed to parse media playlist {playlist_url}: {e}"
            )));
        }
    };

    let segments = collect_segments(&playlist, playlist_url)?;
    if segments.is_empty() {
        return Err(HlsDownloaderError::EmptyPlaylist {
            url: playlist_url.to_string(),
        });
    }
    Ok(segments)
}

pub struct MediaPlaylistParser {
    http_client: Client,
    config: Arc<HlsConfig>,
}

impl MediaPlaylistParser {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Fetches the media playlist at `url` and returns its segments in order.
    pub async fn load_segments(&self, url: &Url) -> Result<Vec<Segment>, HlsDownloaderError> {
        let content = get_text(
            &self.http_client,
            url,
            self.config.playlist_config.playlist_fetch_timeout,
        )
        .await?;
        let segments = parse_media_playlist(content.as_bytes(), url)?;
        let encrypted = segments.iter().filter(|s| s.key.is_some()).count();
        debug!(
            url = %url,
            segments = segments.len(),
            encrypted,
            "Parsed media playlist"
        );
        Ok(segments)
    }
}
