// HLS Playlist Resolver: fetches the master playlist of an episode and picks one variant.

use crate::hls::HlsDownloaderError;
use crate::hls::config::HlsConfig;
use crate::hls::request::get_text;
use m3u8_rs::{AlternativeMediaType, MasterPlaylist, parse_playlist_res};
use reqwest::Client;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// One quality/language rendition advertised by a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Vertical resolution in pixels, when the variant declares one.
    pub resolution: Option<u64>,
    pub bandwidth: u64,
    pub audio_group: Option<String>,
    pub audio_language: Option<String>,
    pub media_playlist_url: Url,
}

/// Requested vertical resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionPreference {
    #[default]
    Highest,
    Exact(u64),
}

impl fmt::Display for ResolutionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPreference::Highest => write!(f, "highest"),
            ResolutionPreference::Exact(height) => write!(f, "{height}p"),
        }
    }
}

impl FromStr for ResolutionPreference {
    type Err = String;

    /// Accepts `highest`, `1080` or `1080p`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || s == "highest" || s == "best" {
            return Ok(ResolutionPreference::Highest);
        }
        let digits = s.strip_suffix('p').unwrap_or(s.as_str());
        digits
            .parse::<u64>()
            .map(ResolutionPreference::Exact)
            .map_err(|_| format!("Invalid resolution '{s}', expected 'highest' or a height like 720"))
    }
}

/// What the caller wants out of the master playlist.
#[derive(Debug, Clone, Default)]
pub struct VariantPreference {
    pub resolution: ResolutionPreference,
    pub audio_language: Option<String>,
}

/// Builds the master playlist URL for an episode token. Absolute URLs are taken as-is.
pub fn master_playlist_url(template: &str, token: &str) -> Result<Url, HlsDownloaderError> {
    let raw = if token.starts_with("http://") || token.starts_with("https://") {
        token.to_string()
    } else {
        if !template.contains("{token}") {
            return Err(HlsDownloaderError::ConfigError(format!(
                "Master URL template '{template}' has no {{token}} placeholder"
            )));
        }
        template.replace("{token}", token)
    };
    Url::parse(&raw).map_err(|e| {
        HlsDownloaderError::ConfigError(format!("Invalid master playlist URL {raw}: {e}"))
    })
}

/// Extracts the variants of a master playlist, resolving their URIs against `master_url`.
pub fn parse_master_playlist(
    content: &[u8],
    master_url: &Url,
) -> Result<Vec<Variant>, HlsDownloaderError> {
    let master = match parse_playlist_res(content) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => pl,
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => {
            return Err(HlsDownloaderError::ParseError(format!(
                "{master_url} is a media playlist, expected a master playlist with variants"
            )));
        }
        Err(e) => {
            return Err(HlsDownloaderError::ParseError(format!(
                "Failed to parse master playlist {master_url}: {e}"
            )));
        }
    };

    let mut variants = Vec::with_capacity(master.variants.len());
    for stream in master.variants.iter().filter(|v| !v.is_i_frame) {
        let media_playlist_url = master_url.join(&stream.uri).map_err(|e| {
            HlsDownloaderError::ParseError(format!(
                "Could not join master URL with variant URI {}: {e}",
                stream.uri
            ))
        })?;
        variants.push(Variant {
            resolution: stream.resolution.map(|r| r.height),
            bandwidth: stream.bandwidth,
            audio_language: stream
                .audio
                .as_deref()
                .and_then(|group| group_language(&master, group)),
            audio_group: stream.audio.clone(),
            media_playlist_url,
        });
    }

    if variants.is_empty() {
        return Err(HlsDownloaderError::ParseError(format!(
            "Master playlist {master_url} has no variants"
        )));
    }
    Ok(variants)
}

// The DEFAULT=YES rendition of the group names its language, else the first one listed.
fn group_language(master: &MasterPlaylist, group: &str) -> Option<String> {
    let mut renditions = master
        .alternatives
        .iter()
        .filter(|a| matches!(a.media_type, AlternativeMediaType::Audio) && a.group_id == group);
    let first = renditions.clone().next()?;
    let chosen = renditions.find(|a| a.default).unwrap_or(first);
    chosen
        .language
        .clone()
        .or_else(|| Some(chosen.name.clone()).filter(|n| !n.is_empty()))
}

/// Applies the selection policy: audio language first, then resolution.
pub fn select_variant<'a>(
    variants: &'a [Variant],
    preference: &VariantPreference,
) -> Result<&'a Variant, HlsDownloaderError> {
    let candidates: Vec<&Variant> = match &preference.audio_language {
        Some(code) => {
            let matching: Vec<&Variant> = variants
                .iter()
                .filter(|v| {
                    v.audio_language
                        .as_deref()
                        .is_some_and(|lang| lang.eq_ignore_ascii_case(code))
                })
                .collect();
            if matching.is_empty() {
                return Err(HlsDownloaderError::VariantNotFound(format!(
                    "audio language '{code}'"
                )));
            }
            matching
        }
        None => match variants.iter().find_map(|v| v.audio_group.as_deref()) {
            Some(first_group) => variants
                .iter()
                .filter(|v| v.audio_group.as_deref() == Some(first_group))
                .collect(),
            None => variants.iter().collect(),
        },
    };

    match preference.resolution {
        ResolutionPreference::Exact(height) => candidates
            .into_iter()
            .find(|v| v.resolution == Some(height))
            .ok_or_else(|| {
                HlsDownloaderError::VariantNotFound(match &preference.audio_language {
                    Some(code) => format!("resolution {height}p with audio language '{code}'"),
                    None => format!("resolution {height}p"),
                })
            }),
        // Strictly-greater comparison keeps the first listed variant on ties.
        ResolutionPreference::Highest => candidates
            .into_iter()
            .fold(None::<&Variant>, |best, v| match best {
                Some(b) if v.resolution.unwrap_or(0) <= b.resolution.unwrap_or(0) => Some(b),
                _ => Some(v),
            })
            .ok_or_else(|| HlsDownloaderError::VariantNotFound("no candidates".to_string())),
    }
}

pub struct PlaylistResolver {
    http_client: Client,
    config: Arc<HlsConfig>,
}

impl PlaylistResolver {
    pub fn new(http_client: Client, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Fetches and parses the master playlist of `token`.
    pub async fn load_variants(&self, token: &str) -> Result<Vec<Variant>, HlsDownloaderError> {
        let master_url =
            master_playlist_url(&self.config.playlist_config.master_url_template, token)?;
        debug!(url = %master_url, "Fetching master playlist");
        let content = get_text(
            &self.http_client,
            &master_url,
            self.config.playlist_config.playlist_fetch_timeout,
        )
        .await?;
        parse_master_playlist(content.as_bytes(), &master_url)
    }

    /// Resolves `token` to the variant matching `preference`.
    pub async fn resolve(
        &self,
        token: &str,
        preference: &VariantPreference,
    ) -> Result<Variant, HlsDownloaderError> {
        let variants = self.load_variants(token).await?;
        let selected = select_variant(&variants, preference)?.clone();
        info!(
            resolution = ?selected.resolution,
            audio = ?selected.audio_language,
            url = %selected.media_playlist_url,
            "Selected variant out of {}",
            variants.len()
        );
        Ok(selected)
    }
}
