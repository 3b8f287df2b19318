/// Host configuration read from the environment (and `.env`).
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::platform;
use crate::workers::tool_locator::Tool;

/// Audio container produced by the downloader and searched by `checkExists`.
pub const AUDIO_EXTENSION: &str = "m4a";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SHELL_FUNCTION: &str = "ytm";

/// How the downloader is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloaderProvider {
    /// Run yt-dlp directly with located yt-dlp and ffmpeg binaries.
    Direct,
    /// Delegate to a user-defined function in a login shell that already
    /// knows where the tools live.
    Shell { shell: String, function: String },
}

impl DownloaderProvider {
    pub fn as_str(&self) -> &str {
        match self {
            DownloaderProvider::Direct => "direct",
            DownloaderProvider::Shell { .. } => "shell",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Download target and `checkExists` search directory.
    pub output_dir: PathBuf,
    pub provider: DownloaderProvider,
    /// `None` disables the timeout.
    pub download_timeout: Option<Duration>,
    pub open_after_download: bool,
    pub tool_overrides: Vec<(Tool, PathBuf)>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            output_dir: platform::default_music_dir(),
            provider: DownloaderProvider::Direct,
            download_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            open_after_download: true,
            tool_overrides: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let output_dir = get("YTM_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let provider = match get("YTM_PROVIDER").as_deref() {
            None | Some("direct") => DownloaderProvider::Direct,
            Some("shell") => DownloaderProvider::Shell {
                shell: get("YTM_SHELL")
                    .or_else(|| get("SHELL"))
                    .unwrap_or_else(|| "/bin/sh".to_string()),
                function: get("YTM_SHELL_FUNCTION")
                    .unwrap_or_else(|| DEFAULT_SHELL_FUNCTION.to_string()),
            },
            Some(other) => {
                warn!("Unknown YTM_PROVIDER {:?}, using direct", other);
                DownloaderProvider::Direct
            }
        };

        let download_timeout = match get("YTM_DOWNLOAD_TIMEOUT_SECS") {
            None => defaults.download_timeout,
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!("Invalid YTM_DOWNLOAD_TIMEOUT_SECS {:?}, using {}s", raw, DEFAULT_TIMEOUT_SECS);
                    defaults.download_timeout
                }
            },
        };

        let open_after_download = match get("YTM_OPEN_AFTER_DOWNLOAD") {
            None => defaults.open_after_download,
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!("Invalid YTM_OPEN_AFTER_DOWNLOAD {:?}, using true", raw);
                defaults.open_after_download
            }),
        };

        let tool_overrides = [Tool::YtDlp, Tool::Ffmpeg]
            .into_iter()
            .filter_map(|tool| get(tool.override_var()).map(|p| (tool, PathBuf::from(p))))
            .collect();

        Self {
            output_dir,
            provider,
            download_timeout,
            open_after_download,
            tool_overrides,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
