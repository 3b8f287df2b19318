/// Request dispatch for the native messaging host.
///
/// Reads one request, runs the matching command, and writes any events
/// followed by exactly one reply.
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use ytm_shared::errors::{HostError, HostResult};
use ytm_shared::framing::{FrameReader, FrameWriter};
use ytm_shared::ipc_protocol::{FolderTarget, HostAction, HostReply, HostRequest};

use crate::config::HostConfig;
use crate::library;
use crate::platform;
use crate::workers::download_runner::DownloadRunner;
use crate::workers::tool_locator::{Tool, ToolLocator};

/// Shared state for command handlers.
pub struct AppState {
    pub config: HostConfig,
    pub tools: ToolLocator,
}

/// Serve a single request.
///
/// Returns `Ok(false)` when the input closed before any request arrived.
/// Errors are only returned when the reply itself cannot be written.
pub async fn serve_one<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    state: &AppState,
) -> HostResult<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match reader.read_message::<serde_json::Value>().await {
        Ok(Some(value)) => HostRequest::from_value(value),
        Ok(None) => {
            info!("Input closed before any request");
            return Ok(false);
        }
        Err(e) => Err(e),
    };

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            error!("Rejected inbound message: {}", e);
            writer
                .send_message(&HostReply::failure(format!("Host error: {}", e)))
                .await?;
            return Ok(true);
        }
    };

    info!("Handling command: {}", request.command_name());
    let reply = handle_command(&request, writer, state).await?;
    if !reply.success {
        warn!("{} failed: {}", request.command_name(), reply.message);
    }
    writer.send_message(&reply).await?;
    Ok(true)
}

/// Route a request to its handler and produce the reply.
async fn handle_command<W>(
    request: &HostRequest,
    writer: &mut FrameWriter<W>,
    state: &AppState,
) -> HostResult<HostReply>
where
    W: AsyncWrite + Unpin,
{
    let action = match request.action() {
        Ok(action) => action,
        Err(e @ HostError::MissingField("video title")) => {
            return Ok(HostReply::failure(e.to_string()).with_exists(false));
        }
        Err(e) => return Ok(HostReply::failure(e.to_string())),
    };

    let reply = match action {
        HostAction::Download { url } => cmd_download(writer, &url, state).await?,
        HostAction::OpenFolder { target } => cmd_open_folder(target, state).await,
        HostAction::CheckExists { video_title } => cmd_check_exists(&video_title, state),
        HostAction::CheckDependencies => cmd_check_dependencies(state),
    };
    Ok(reply)
}

// ====== DOWNLOAD ======

/// Run a download, forwarding its events while it runs.
///
/// The outer error is a failed event write; download failures are replies.
async fn cmd_download<W>(
    writer: &mut FrameWriter<W>,
    url: &str,
    state: &AppState,
) -> HostResult<HostReply>
where
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = DownloadRunner::new(&state.config, &state.tools, tx);

    let forward = async {
        while let Some(event) = rx.recv().await {
            match event.progress_percent() {
                Some(pct) => trace!("Progress {:.1}%", pct),
                None => debug!("Event: {}", event.message()),
            }
            writer.send_message(&event).await?;
        }
        Ok::<(), HostError>(())
    };

    let (outcome, forwarded) = tokio::join!(runner.run(url), forward);
    forwarded?;

    let reply = match outcome {
        Ok(outcome) => HostReply::success("Download completed successfully")
            .with_output(outcome.output)
            .with_file_path(outcome.file_path.map(|p| p.display().to_string())),
        Err(
            e @ (HostError::ChildProcess { .. }
            | HostError::Timeout { .. }
            | HostError::MissingTool(_)),
        ) => HostReply::from_error(&e),
        Err(e) => HostReply::failure(format!("Error downloading video: {}", e)),
    };
    Ok(reply)
}

// ====== AUXILIARY COMMANDS ======

async fn cmd_open_folder(target: FolderTarget, state: &AppState) -> HostReply {
    let path = match target {
        FolderTarget::MusicDirectory => {
            let dir = state.config.output_dir.clone();
            if let Err(e) = std::fs::create_dir_all(&dir) {
                return HostReply::failure(format!("Error opening folder: {}", e));
            }
            dir
        }
        FolderTarget::Path(path) => PathBuf::from(path),
    };

    match platform::open_path(&path).await {
        Ok(status) if status.success() => {
            HostReply::success(format!("Opened folder: {}", path.display()))
        }
        Ok(status) => HostReply::failure(format!("Failed to open folder: {}", status)),
        Err(e) => HostReply::failure(format!("Error opening folder: {}", e)),
    }
}

fn cmd_check_exists(video_title: &str, state: &AppState) -> HostReply {
    match library::find_existing(&state.config.output_dir, video_title) {
        Ok(Some(path)) => {
            HostReply::success(format!("File exists: {}", path.display())).with_exists(true)
        }
        Ok(None) => HostReply::success("File does not exist").with_exists(false),
        Err(e) => HostReply::failure(format!("Error checking file: {}", e)).with_exists(false),
    }
}

fn cmd_check_dependencies(state: &AppState) -> HostReply {
    let yt_dlp = state.tools.locate(Tool::YtDlp);
    let ffmpeg = state.tools.locate(Tool::Ffmpeg);

    match (yt_dlp, ffmpeg) {
        (Some(yt_dlp), Some(ffmpeg)) => HostReply::success("All dependencies found")
            .with_tool_paths(yt_dlp.display().to_string(), ffmpeg.display().to_string()),
        (yt_dlp, ffmpeg) => {
            let mut missing = Vec::new();
            if yt_dlp.is_none() {
                missing.push(Tool::YtDlp.name());
            }
            if ffmpeg.is_none() {
                missing.push(Tool::Ffmpeg.name());
            }
            let install = platform::install_command(std::env::consts::OS, &missing);
            HostReply::failure(format!("Missing dependencies: {}", missing.join(", ")))
                .with_missing(missing.iter().map(|s| s.to_string()).collect(), install)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloaderProvider;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use ytm_shared::framing::encode_frame;

    fn state_for(output_dir: &Path, tools: ToolLocator) -> AppState {
        AppState {
            config: HostConfig {
                output_dir: output_dir.to_path_buf(),
                provider: DownloaderProvider::Direct,
                download_timeout: Some(Duration::from_secs(5)),
                open_after_download: false,
                tool_overrides: Vec::new(),
            },
            tools,
        }
    }

    /// Feed `input` to `serve_one` and decode every frame written back.
    async fn serve(input: &[u8], state: &AppState) -> (bool, Vec<Value>) {
        let mut reader = FrameReader::new(input, false);
        let mut writer = FrameWriter::new(Vec::new());
        let served = serve_one(&mut reader, &mut writer, state).await.unwrap();

        let out = writer.into_inner();
        let mut frames = FrameReader::new(&out[..], false);
        let mut values = Vec::new();
        while let Some(value) = frames.read_message::<Value>().await.unwrap() {
            values.push(value);
        }
        (served, values)
    }

    async fn request(value: Value, state: &AppState) -> Vec<Value> {
        let frame = encode_frame(&value).unwrap();
        let (served, frames) = serve(&frame, state).await;
        assert!(served);
        frames
    }

    #[cfg(unix)]
    fn touch_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));
        let frames = request(json!({"command": "selfDestruct"}), &state).await;
        assert_eq!(frames, vec![json!({"success": false, "message": "Unknown command"})]);

        let frames = request(json!({"url": "https://youtu.be/x"}), &state).await;
        assert_eq!(frames[0]["message"], "Unknown command");
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));

        let frames = request(json!({"command": "download"}), &state).await;
        assert_eq!(frames, vec![json!({"success": false, "message": "No URL provided"})]);

        let frames = request(json!({"command": "openFolder", "path": ""}), &state).await;
        assert_eq!(frames, vec![json!({"success": false, "message": "No path provided"})]);

        let frames = request(json!({"command": "checkExists"}), &state).await;
        assert_eq!(
            frames,
            vec![json!({"success": false, "exists": false, "message": "No video title provided"})]
        );
    }

    #[tokio::test]
    async fn test_check_exists_sanitized_title() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Song_ Title_.m4a");
        std::fs::write(&file, b"").unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));

        let frames =
            request(json!({"command": "checkExists", "videoTitle": "Song: Title?"}), &state).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["success"], true);
        assert_eq!(frames[0]["exists"], true);
        assert_eq!(frames[0]["message"], format!("File exists: {}", file.display()));

        let frames =
            request(json!({"command": "checkExists", "videoTitle": "Other Song"}), &state).await;
        assert_eq!(
            frames,
            vec![json!({"success": true, "exists": false, "message": "File does not exist"})]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_dependencies_all_found() {
        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let yt_dlp = touch_executable(bin.path(), "yt-dlp");
        let ffmpeg = touch_executable(bin.path(), "ffmpeg");
        let state = state_for(dir.path(), ToolLocator::with_dirs(vec![bin.path().to_path_buf()]));

        let frames = request(json!({"command": "checkDependencies"}), &state).await;
        assert_eq!(
            frames,
            vec![json!({
                "success": true,
                "message": "All dependencies found",
                "yt_dlp_path": yt_dlp.display().to_string(),
                "ffmpeg_path": ffmpeg.display().to_string(),
            })]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_dependencies_missing_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        touch_executable(bin.path(), "yt-dlp");
        let state = state_for(dir.path(), ToolLocator::with_dirs(vec![bin.path().to_path_buf()]));

        let frames = request(json!({"command": "checkDependencies"}), &state).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["success"], false);
        assert_eq!(frames[0]["missing"], json!(["ffmpeg"]));
        assert_eq!(frames[0]["message"], "Missing dependencies: ffmpeg");
        assert_eq!(
            frames[0]["install_command"],
            platform::install_command(std::env::consts::OS, &["ffmpeg"])
        );
    }

    #[tokio::test]
    async fn test_download_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));

        let frames =
            request(json!({"command": "download", "url": "https://youtu.be/x"}), &state).await;
        assert_eq!(
            frames,
            vec![json!({"success": false, "message": "yt-dlp not found. Please install it first."})]
        );
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = touch_executable(dir, name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_download_streams_events_then_reply() {
        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        write_script(
            bin.path(),
            "yt-dlp",
            "echo '[download]  42.5% of 3MiB'\necho boom >&2\nexit 1",
        );
        write_script(bin.path(), "ffmpeg", "exit 0");
        let state = state_for(dir.path(), ToolLocator::with_dirs(vec![bin.path().to_path_buf()]));

        let frames =
            request(json!({"command": "download", "url": "https://youtu.be/abc"}), &state).await;

        let (reply, events) = frames.split_last().unwrap();
        assert!(events.iter().all(|frame| frame.get("type").is_some()));
        assert_eq!(events[0]["message"], "[INIT] Starting download: https://youtu.be/abc");
        assert_eq!(
            events[events.len() - 3],
            json!({"type": "log", "message": "[download]  42.5% of 3MiB"})
        );
        assert_eq!(events[events.len() - 2]["type"], "progress");
        assert_eq!(events[events.len() - 2]["percentage"], 42.5);
        assert_eq!(events[events.len() - 1], json!({"type": "log", "message": "boom"}));

        assert_eq!(
            *reply,
            json!({
                "success": false,
                "message": "Download failed (exit code 1)",
                "output": "[download]  42.5% of 3MiB\nboom",
                "exit_code": 1,
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_host_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));

        let mut input = 5u32.to_ne_bytes().to_vec();
        input.extend_from_slice(b"nope!");
        let (served, frames) = serve(&input, &state).await;
        assert!(served);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["success"], false);
        assert!(frames[0]["message"].as_str().unwrap().starts_with("Host error: "));
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), ToolLocator::with_dirs(Vec::new()));
        let (served, frames) = serve(b"", &state).await;
        assert!(!served);
        assert!(frames.is_empty());
    }
}
