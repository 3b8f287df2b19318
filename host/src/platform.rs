/// OS-specific glue: default music directory, "open with default app",
/// and dependency install hints.
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::debug;

/// `<home>/Music/ytm` on every platform.
pub fn default_music_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
        .join("ytm")
}

/// Command that opens a file or folder with the OS default handler.
pub fn open_command(path: &Path) -> Command {
    #[cfg(target_os = "windows")]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg("start").arg("").arg(path);
        cmd
    }

    #[cfg(target_os = "macos")]
    {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

/// Open `path` with the default handler and wait for the launcher to exit.
///
/// The launcher's stdio is detached: stdout belongs to the framed protocol.
pub async fn open_path(path: &Path) -> std::io::Result<ExitStatus> {
    debug!("Opening {}", path.display());
    open_command(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
}

/// Install hint for the missing tools on the given OS
/// (`std::env::consts::OS` naming).
pub fn install_command(os: &str, missing: &[&str]) -> String {
    match os {
        "macos" => format!("brew install {}", missing.join(" ")),
        "windows" => "winget install yt-dlp.yt-dlp Gyan.FFmpeg".to_string(),
        _ => {
            let yt_dlp = missing.contains(&"yt-dlp");
            let ffmpeg = missing.contains(&"ffmpeg");
            match (yt_dlp, ffmpeg) {
                (true, true) => "sudo apt install python3-pip ffmpeg && pip3 install yt-dlp".to_string(),
                (true, false) => "pip3 install yt-dlp".to_string(),
                _ => "sudo apt install ffmpeg".to_string(),
            }
        }
    }
}
