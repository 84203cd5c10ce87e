use std::path::Path;

use pahe_engine::hls::{AssemblyMode, ResolutionPreference};

use crate::error::AppError;

/// Characters that are not allowed in file names on at least one common platform.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const DEFAULT_SERIES: &str = "Episode";

/// Creates all directories in the given path, including parent directories if they don't exist.
///
/// # Arguments
///
/// * `path` - The path to create directories for
///
/// # Returns
///
/// * `Ok(())` if directories were created successfully
/// * `Err(AppError::Io)` if there was an I/O error creating the directories
#[inline]
pub async fn create_dirs(path: &Path) -> Result<(), AppError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(AppError::Io)?;
    Ok(())
}

/// Cleans a series title so it can be used as a file name.
///
/// Drops a leading `AnimePahe` tag, turns underscores into spaces, rewrites
/// `Eng Dub` as `(Eng)` and collapses runs of whitespace.
pub fn sanitize_series(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix("AnimePahe").unwrap_or(trimmed);

    let spaced: String = stripped
        .chars()
        .map(|c| {
            if c == '_' || FORBIDDEN.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let words: Vec<&str> = spaced.split_whitespace().collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        if i + 1 < words.len()
            && words[i].eq_ignore_ascii_case("eng")
            && words[i + 1].eq_ignore_ascii_case("dub")
        {
            out.push("(Eng)");
            i += 2;
            continue;
        }
        out.push(words[i]);
        i += 1;
    }

    out.join(" ")
        .trim_matches(|c: char| c == '-' || c == '.' || c.is_whitespace())
        .to_string()
}

/// Zero-padding width for a batch whose highest episode number is `last_episode`.
/// Never narrower than two digits.
pub fn episode_width(last_episode: u32) -> usize {
    last_episode.to_string().len().max(2)
}

pub fn pad_episode(number: u32, width: usize) -> String {
    format!("{number:0width$}")
}

/// File extension produced by an assembly mode.
pub fn output_extension(mode: &AssemblyMode) -> &'static str {
    match mode {
        AssemblyMode::Concat => "ts",
        AssemblyMode::Remux { .. } => "mp4",
    }
}

/// Expands `%s` (series), `%e` (padded episode), `%r` (resolution) and `%t` (token).
/// `%%` yields a literal percent sign; unknown placeholders are kept as written.
pub fn expand_name_template(
    template: &str,
    series: &str,
    episode: &str,
    resolution: &ResolutionPreference,
    token: &str,
) -> String {
    let mut out = String::with_capacity(template.len() + series.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('s') => out.push_str(series),
            Some('e') => out.push_str(episode),
            Some('r') => out.push_str(&resolution.to_string()),
            Some('t') => out.push_str(token),
            Some('%') => out.push('%'),
            _ => {
                out.push('%');
                continue;
            }
        }
        chars.next();
    }
    out
}

fn sanitize_file_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        DEFAULT_SERIES.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Output file naming for a batch of episodes.
#[derive(Debug, Clone)]
pub struct EpisodeNaming {
    series: String,
    template: Option<String>,
    width: usize,
    extension: &'static str,
}

impl EpisodeNaming {
    pub fn new(
        series: Option<&str>,
        template: Option<String>,
        last_episode: u32,
        extension: &'static str,
    ) -> Self {
        let series = series
            .map(sanitize_series)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERIES.to_string());
        Self {
            series,
            template,
            width: episode_width(last_episode),
            extension,
        }
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    /// File name for episode `number`, `"<Series> - <NN>.<ext>"` unless a template is set.
    pub fn file_name(&self, number: u32, token: &str, resolution: &ResolutionPreference) -> String {
        let episode = pad_episode(number, self.width);
        let stem = match &self.template {
            Some(template) => {
                expand_name_template(template, &self.series, &episode, resolution, token)
            }
            None => format!("{} - {episode}", self.series),
        };
        format!("{}.{}", sanitize_file_stem(&stem), self.extension)
    }
}
