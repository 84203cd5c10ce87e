use clap::Parser;
use pahe_engine::ProxyType;
use pahe_engine::config::DEFAULT_REFERER;
use pahe_engine::hls::ResolutionPreference;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Episode HLS downloader",
    long_about = "Downloads episodes served as HLS streams and saves each one as a single file.\n\
                  \n\
                  Every TOKEN is one episode session. The tool resolves the master playlist,\n\
                  picks a variant by resolution and audio language, fetches AES-128 keys once\n\
                  per key URI, downloads and decrypts the segments concurrently and joins them\n\
                  in playlist order. Tokens are numbered from --first-episode."
)]
pub struct CliArgs {
    /// Episode session tokens, in episode order
    #[arg(
        required = true,
        value_name = "TOKEN",
        help = "Episode session token(s); several tokens download a batch in order"
    )]
    pub tokens: Vec<String>,

    /// Output directory for assembled episodes
    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory where episodes and pahe.log are written"
    )]
    pub output_dir: PathBuf,

    /// Output file name template with placeholders
    #[arg(
        short = 'n',
        long = "name",
        help = "Output file name template without extension. Supported placeholders: %s (series), %e (zero-padded episode), %r (resolution), %t (token). Default: \"<Series> - <NN>\""
    )]
    pub name_template: Option<String>,

    /// Series title used in output names
    #[arg(long, help = "Series title used in output file names")]
    pub series: Option<String>,

    /// Number of the first episode
    #[arg(
        long,
        default_value = "1",
        help = "Episode number given to the first token"
    )]
    pub first_episode: u32,

    /// Preferred resolution
    #[arg(
        short,
        long,
        default_value = "highest",
        help = "Vertical resolution to download (e.g. 720 or 1080p), or 'highest'"
    )]
    pub resolution: ResolutionPreference,

    /// Preferred audio language
    #[arg(
        short,
        long,
        help = "Audio language to require (e.g. jpn, eng); episodes without it fail"
    )]
    pub audio: Option<String>,

    /// Number of concurrent segment downloads
    #[arg(
        short,
        long,
        default_value = "5",
        help = "Maximum number of segments downloaded at once"
    )]
    pub threads: usize,

    /// Segment retry attempts
    #[arg(
        long,
        default_value = "2",
        help = "Number of retries for a failed segment download, on top of the first attempt"
    )]
    pub retries: u32,

    /// Only print the media playlist URL
    #[arg(
        short,
        long,
        help = "Print the selected media playlist URL instead of downloading"
    )]
    pub link_only: bool,

    /// Remux through ffmpeg
    #[arg(
        long,
        help = "Remux the joined segments into an MP4 container with ffmpeg (stream copy)"
    )]
    pub remux: bool,

    /// ffmpeg executable
    #[arg(
        long,
        default_value = "ffmpeg",
        help = "Path to the ffmpeg executable used by --remux"
    )]
    pub ffmpeg: PathBuf,

    /// Replace existing episodes
    #[arg(
        short,
        long,
        help = "Download episodes again even if the output file already exists"
    )]
    pub force: bool,

    /// Referer sent with every request
    #[arg(
        long,
        env = "PAHE_REFERER",
        default_value = DEFAULT_REFERER,
        help = "Referer header sent with every request; the CDN rejects requests without it"
    )]
    pub referer: String,

    /// Master playlist URL template
    #[arg(
        long,
        env = "PAHE_PLAYLIST_TEMPLATE",
        help = "Master playlist URL template; {token} is replaced by the episode token"
    )]
    pub playlist_template: Option<String>,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type
    #[arg(long, value_enum, default_value_t = ProxyType::All, help = "Proxy type")]
    pub proxy_type: ProxyType,

    /// Proxy username
    #[arg(long, requires = "proxy_pass", help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, requires = "proxy_user", help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        conflicts_with = "proxy",
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "0",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Playlist timeout in seconds
    #[arg(
        long,
        default_value = "15",
        help = "Timeout for master and media playlist requests in seconds"
    )]
    pub playlist_timeout: u64,

    /// Segment timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Timeout for individual segment downloads in seconds"
    )]
    pub segment_timeout: u64,

    /// Key timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Timeout for decryption key requests in seconds"
    )]
    pub key_timeout: u64,

    /// Derive missing IVs from the media sequence number
    #[arg(
        long,
        help = "Use the segment media sequence number as IV when a key declares none (default: all-zero IV)"
    )]
    pub iv_from_sequence: bool,

    /// Show progress bars
    #[arg(
        short = 'P',
        long = "progress",
        help = "Show a progress bar per episode"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet", help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, help = "Only log errors")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["pahe", "tok1"]).unwrap();
        assert_eq!(args.tokens, vec!["tok1".to_string()]);
        assert_eq!(args.resolution, ResolutionPreference::Highest);
        assert_eq!(args.threads, 5);
        assert_eq!(args.retries, 2);
        assert_eq!(args.first_episode, 1);
        assert_eq!(args.proxy_type, ProxyType::All);
        assert!(!args.link_only);
    }

    #[test]
    fn test_batch_options() {
        let args = CliArgs::try_parse_from([
            "pahe",
            "-r",
            "720p",
            "-a",
            "eng",
            "-t",
            "8",
            "--series",
            "Show",
            "--first-episode",
            "12",
            "-H",
            "Origin: https://kwik.cx",
            "--proxy",
            "127.0.0.1:1080",
            "--proxy-type",
            "socks5",
            "a",
            "b",
        ])
        .unwrap();
        assert_eq!(args.resolution, ResolutionPreference::Exact(720));
        assert_eq!(args.audio.as_deref(), Some("eng"));
        assert_eq!(args.threads, 8);
        assert_eq!(args.first_episode, 12);
        assert_eq!(args.tokens.len(), 2);
        assert_eq!(args.headers.len(), 1);
        assert_eq!(args.proxy_type, ProxyType::Socks5);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(CliArgs::try_parse_from(["pahe"]).is_err());
        assert!(CliArgs::try_parse_from(["pahe", "-r", "tall", "tok"]).is_err());
        assert!(CliArgs::try_parse_from(["pahe", "-v", "-q", "tok"]).is_err());
        assert!(CliArgs::try_parse_from(["pahe", "--proxy-user", "u", "tok"]).is_err());
    }
}
