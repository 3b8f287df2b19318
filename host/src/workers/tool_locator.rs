/// External tool discovery for yt-dlp and ffmpeg.
///
/// Resolution order: explicit override, the system lookup command
/// (`which` / `where`), conventional install directories, then a generic
/// PATH search. Results are memoized for the lifetime of the locator.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

/// Tools the host depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    YtDlp,
    Ffmpeg,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::YtDlp => "yt-dlp",
            Tool::Ffmpeg => "ffmpeg",
        }
    }

    /// Environment variable that pins this tool to a specific path.
    pub fn override_var(&self) -> &'static str {
        match self {
            Tool::YtDlp => "YTM_YT_DLP_PATH",
            Tool::Ffmpeg => "YTM_FFMPEG_PATH",
        }
    }

    /// File name of the executable on this platform.
    pub fn file_name(&self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.exe", self.name())
        } else {
            self.name().to_string()
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Memoized tool name -> path resolver.
pub struct ToolLocator {
    overrides: HashMap<Tool, PathBuf>,
    search_dirs: Vec<PathBuf>,
    /// Whether to consult `which`/`where` and PATH.
    system_lookup: bool,
    cache: Mutex<HashMap<Tool, Option<PathBuf>>>,
}

impl ToolLocator {
    /// Locator using the system lookup and the conventional directories.
    pub fn system(overrides: Vec<(Tool, PathBuf)>) -> Self {
        Self {
            overrides: overrides.into_iter().collect(),
            search_dirs: conventional_dirs(),
            system_lookup: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Locator restricted to the given directories (no `which`, no PATH).
    #[cfg(test)]
    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            overrides: HashMap::new(),
            search_dirs,
            system_lookup: false,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool, path.into());
        self
    }

    /// Find a tool, consulting the cache first.
    pub fn locate(&self, tool: Tool) -> Option<PathBuf> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&tool) {
            return hit.clone();
        }
        let found = self.resolve(tool);
        match &found {
            Some(path) => info!("Located {} at {}", tool, path.display()),
            None => info!("{} not found", tool),
        }
        cache.insert(tool, found.clone());
        found
    }

    fn resolve(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(&tool) {
            if path.is_file() {
                return Some(path.clone());
            }
            debug!("Ignoring {} override {}: not a file", tool, path.display());
        }

        if self.system_lookup {
            if let Some(path) = lookup_command(tool.name()) {
                return Some(path);
            }
        }

        let file_name = tool.file_name();
        for dir in &self.search_dirs {
            let candidate = dir.join(&file_name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }

        if self.system_lookup {
            return which::which(tool.name()).ok();
        }
        None
    }
}

/// Ask the OS lookup command (`which` / `where`) for a tool.
fn lookup_command(name: &str) -> Option<PathBuf> {
    let finder = if cfg!(target_os = "windows") { "where" } else { "which" };
    let output = std::process::Command::new(finder)
        .arg(name)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    // `where` may list several matches, one per line
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(PathBuf::from(first))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Conventional install locations for the current platform.
fn conventional_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if cfg!(target_os = "windows") {
        if let Ok(local_app) = std::env::var("LOCALAPPDATA") {
            let winget = PathBuf::from(&local_app).join("Microsoft").join("WinGet");
            dirs.push(winget.join("Links"));

            // winget unpacks ffmpeg under Packages/Gyan.FFmpeg*/<version>/bin
            if let Ok(entries) = std::fs::read_dir(winget.join("Packages")) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !name.starts_with("Gyan.FFmpeg") {
                        continue;
                    }
                    if let Ok(sub_entries) = std::fs::read_dir(entry.path()) {
                        for sub in sub_entries.flatten() {
                            dirs.push(sub.path().join("bin"));
                        }
                    }
                }
            }
        }
        for path in &[r"C:\ffmpeg\bin", r"C:\Program Files\ffmpeg\bin"] {
            dirs.push(PathBuf::from(path));
        }
    } else {
        for path in &[
            "/opt/homebrew/bin",
            "/usr/local/bin",
            "/usr/bin",
            "/bin",
            "/snap/bin",
            "/home/linuxbrew/.linuxbrew/bin",
        ] {
            dirs.push(PathBuf::from(path));
        }
    }

    dirs
}
