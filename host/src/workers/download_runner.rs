/// yt-dlp download runner.
///
/// Builds the downloader invocation for the configured provider, spawns it
/// with stdout and stderr sharing one pipe, and forwards classified events on
/// an unbounded channel while the child runs.
use std::io::{BufRead, PipeReader, PipeWriter};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ytm_shared::errors::{HostError, HostResult};
use ytm_shared::ipc_protocol::HostEvent;

use crate::config::{DownloaderProvider, HostConfig, AUDIO_EXTENSION};
use crate::library;
use crate::output_parser;
use crate::platform;
use crate::workers::tool_locator::{Tool, ToolLocator};

type Segments = mpsc::UnboundedReceiver<std::io::Result<Vec<u8>>>;

/// Program and arguments for one downloader run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    /// Direct yt-dlp call: single video, best-quality m4a audio with metadata
    /// and thumbnail, named after the video title.
    pub fn direct(yt_dlp: &Path, ffmpeg: &Path, output_dir: &Path, url: &str) -> Self {
        let template = output_dir.join("%(title)s.%(ext)s");
        let args = vec![
            "--no-playlist".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            AUDIO_EXTENSION.to_string(),
            "--audio-quality".to_string(),
            "0".to_string(),
            "--embed-metadata".to_string(),
            "--embed-thumbnail".to_string(),
            "--ffmpeg-location".to_string(),
            ffmpeg.to_string_lossy().to_string(),
            "--output".to_string(),
            template.to_string_lossy().to_string(),
            url.to_string(),
        ];
        Self {
            program: yt_dlp.to_path_buf(),
            args,
        }
    }

    /// Call a user-defined function through an interactive login shell.
    pub fn shell(shell: &str, function: &str, url: &str) -> HostResult<Self> {
        let quoted = shlex::try_quote(url).map_err(|e| HostError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            program: PathBuf::from(shell),
            args: vec![
                "-l".to_string(),
                "-i".to_string(),
                "-c".to_string(),
                format!("{} {}", function, quoted),
            ],
        })
    }

    /// Human-readable command line for logging.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Command writing both stdout and stderr into `output`.
    ///
    /// On Unix the child leads its own process group so a timeout can take
    /// down everything it started.
    fn to_command(&self, output: PipeWriter) -> std::io::Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(output.try_clone()?)
            .stderr(output)
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        Ok(cmd)
    }

    /// Spawn the child and start reading its merged output.
    fn spawn(&self) -> HostResult<(Child, Segments)> {
        let (reader, writer) = std::io::pipe()?;
        let mut command = self.to_command(writer)?;
        let spawned = command.spawn();
        // The parent's write ends must close or the reader never sees EOF
        drop(command);

        let child = spawned.map_err(|source| HostError::SpawnFailed {
            program: self.program.display().to_string(),
            source,
        })?;
        Ok((child, read_segments(reader)?))
    }
}

/// Read `\n`-terminated segments on a detached thread; the runtime never
/// waits for it on shutdown.
fn read_segments(reader: PipeReader) -> std::io::Result<Segments> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("ytm-output".to_string())
        .spawn(move || {
            for segment in std::io::BufReader::new(reader).split(b'\n') {
                let failed = segment.is_err();
                if tx.send(segment).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Kill the downloader and, on Unix, its whole process group.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill downloader: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Outcome of a successful (exit code 0) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// All captured output lines joined with `\n`.
    pub output: String,
    pub file_path: Option<PathBuf>,
}

/// Runs one download and reports events on `events`.
///
/// `run`/`execute` consume the runner so the event sender is dropped as soon
/// as the download finishes, which closes the channel for the forwarder.
pub struct DownloadRunner<'a> {
    config: &'a HostConfig,
    tools: &'a ToolLocator,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl<'a> DownloadRunner<'a> {
    pub fn new(
        config: &'a HostConfig,
        tools: &'a ToolLocator,
        events: mpsc::UnboundedSender<HostEvent>,
    ) -> Self {
        Self { config, tools, events }
    }

    /// Build the invocation for the configured provider.
    pub fn invocation(&self, url: &str) -> HostResult<Invocation> {
        match &self.config.provider {
            DownloaderProvider::Direct => {
                let yt_dlp = self
                    .tools
                    .locate(Tool::YtDlp)
                    .ok_or_else(|| HostError::MissingTool(Tool::YtDlp.to_string()))?;
                let ffmpeg = self
                    .tools
                    .locate(Tool::Ffmpeg)
                    .ok_or_else(|| HostError::MissingTool(Tool::Ffmpeg.to_string()))?;
                Ok(Invocation::direct(&yt_dlp, &ffmpeg, &self.config.output_dir, url))
            }
            DownloaderProvider::Shell { shell, function } => Invocation::shell(shell, function, url),
        }
    }

    /// Download `url` with the configured provider.
    pub async fn run(self, url: &str) -> HostResult<DownloadOutcome> {
        let invocation = self.invocation(url)?;
        self.execute(&invocation, url).await
    }

    /// Run a prepared invocation to completion.
    pub async fn execute(self, invocation: &Invocation, url: &str) -> HostResult<DownloadOutcome> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        self.emit(HostEvent::log(format!("[INIT] Starting download: {}", url)));
        self.emit(HostEvent::log(format!("[CMD] {}", invocation.command_line())));
        info!(
            "Starting download via {} provider: {}",
            self.config.provider.as_str(),
            url
        );

        let (mut child, mut segments) = invocation.spawn()?;
        debug!("Downloader spawned (pid: {:?})", child.id());

        let mut relay = OutputRelay::new(self.events.clone());
        let status = match self.config.download_timeout {
            Some(limit) => {
                let waited =
                    tokio::time::timeout(limit, relay.pump(&mut segments, &mut child)).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!("Download exceeded {:?}, killing downloader", limit);
                        terminate(&mut child).await;
                        return Err(HostError::Timeout {
                            secs: limit.as_secs(),
                            output: relay.joined_output(),
                        });
                    }
                }
            }
            None => relay.pump(&mut segments, &mut child).await?,
        };

        let output = relay.joined_output();
        // Killed by a signal: no exit code
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!("Downloader exited with code {}", code);
            return Err(HostError::ChildProcess { code, output });
        }

        let file_path = self.resolve_output_file(relay.destination.take());
        if let Some(path) = &file_path {
            info!("Download finished: {}", path.display());
            if self.config.open_after_download {
                self.open_in_player(path).await;
            }
        } else {
            warn!("Download finished but no output file was found");
        }

        Ok(DownloadOutcome { output, file_path })
    }

    /// Announced destination if it exists, else the newest audio file.
    fn resolve_output_file(&self, announced: Option<String>) -> Option<PathBuf> {
        if let Some(path) = announced.map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
            debug!("Announced destination {} is missing", path.display());
        }
        match library::newest_audio_file(&self.config.output_dir) {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to scan {}: {}", self.config.output_dir.display(), e);
                None
            }
        }
    }

    async fn open_in_player(&self, path: &Path) {
        let message = match platform::open_path(path).await {
            Ok(status) if status.success() => {
                format!("Opened with default music app: {}", path.display())
            }
            Ok(status) => format!("Failed to open with music app: {}", status),
            Err(e) => format!("Failed to open with music app: {}", e),
        };
        self.emit(HostEvent::log(format!("[MUSIC] {}", message)));
    }

    fn emit(&self, event: HostEvent) {
        if let Err(e) = self.events.send(event) {
            warn!("Event receiver dropped: {}", e);
        }
    }
}

/// Accumulates child output and forwards classified events.
struct OutputRelay {
    events: mpsc::UnboundedSender<HostEvent>,
    lines: Vec<String>,
    destination: Option<String>,
}

impl OutputRelay {
    fn new(events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            events,
            lines: Vec::new(),
            destination: None,
        }
    }

    /// Consume output until every writer has closed the pipe, then wait for exit.
    async fn pump(&mut self, segments: &mut Segments, child: &mut Child) -> HostResult<ExitStatus> {
        while let Some(segment) = segments.recv().await {
            self.push_chunk(&segment?);
        }
        Ok(child.wait().await?)
    }

    fn push_chunk(&mut self, bytes: &[u8]) {
        let chunk = String::from_utf8_lossy(bytes);
        for line in output_parser::split_lines(&chunk) {
            let parsed = output_parser::parse_line(line);
            self.lines.push(line.to_string());
            for event in parsed.events {
                if self.events.send(event).is_err() {
                    debug!("Event receiver dropped, output still captured");
                }
            }
            if parsed.destination.is_some() {
                self.destination = parsed.destination;
            }
        }
    }

    fn joined_output(&self) -> String {
        self.lines.join("\n")
    }
}
