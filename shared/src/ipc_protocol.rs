/// Wire types for browser extension <-> native host communication.
///
/// Every message is a JSON object carried in a native messaging frame
/// (see `framing`). The extension sends one `HostRequest`; the host answers
/// with any number of `HostEvent`s followed by exactly one `HostReply`.
use serde::{Deserialize, Serialize};

use crate::errors::{HostError, HostResult};

/// Special `openFolder` path that stands for the configured music directory.
pub const MUSIC_DIRECTORY_TOKEN: &str = "music_directory";

// ====== REQUEST (extension -> host) ======

/// Request received from the extension.
///
/// Field presence is checked per command by [`HostRequest::action`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
}

/// A validated command with its required fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    Download { url: String },
    OpenFolder { target: FolderTarget },
    CheckExists { video_title: String },
    CheckDependencies,
}

/// Where `openFolder` should point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderTarget {
    MusicDirectory,
    Path(String),
}

impl HostRequest {
    #[cfg(test)]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[cfg(test)]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Parse from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> HostResult<Self> {
        serde_json::from_value(value).map_err(|e| HostError::MalformedMessage(e.to_string()))
    }

    /// Command name as sent, or an empty string when absent.
    pub fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or("")
    }

    /// Validate the command and its required field.
    pub fn action(&self) -> HostResult<HostAction> {
        match self.command_name() {
            "download" => {
                let url = non_empty(&self.url).ok_or(HostError::MissingField("URL"))?;
                Ok(HostAction::Download { url })
            }
            "openFolder" => {
                let path = non_empty(&self.path).ok_or(HostError::MissingField("path"))?;
                let target = if path == MUSIC_DIRECTORY_TOKEN {
                    FolderTarget::MusicDirectory
                } else {
                    FolderTarget::Path(path)
                };
                Ok(HostAction::OpenFolder { target })
            }
            "checkExists" => {
                let video_title =
                    non_empty(&self.video_title).ok_or(HostError::MissingField("video title"))?;
                Ok(HostAction::CheckExists { video_title })
            }
            "checkDependencies" => Ok(HostAction::CheckDependencies),
            _ => Err(HostError::UnknownCommand),
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field.as_deref().filter(|s| !s.is_empty()).map(String::from)
}

// ====== EVENTS (host -> extension, zero or more) ======

/// Non-terminal notification sent while a command runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Log { message: String },
    Progress { percentage: f64, message: String },
}

impl HostEvent {
    pub fn log(message: impl Into<String>) -> Self {
        HostEvent::Log {
            message: message.into(),
        }
    }

    /// Build a progress event. The percentage is clamped to [0, 100].
    pub fn progress(percentage: f64) -> Self {
        let percentage = percentage.clamp(0.0, 100.0);
        HostEvent::Progress {
            percentage,
            message: format!("[{:.1}%] Downloading...", percentage),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            HostEvent::Log { message } | HostEvent::Progress { message, .. } => message,
        }
    }

    /// Extract progress percentage.
    pub fn progress_percent(&self) -> Option<f64> {
        match self {
            HostEvent::Progress { percentage, .. } => Some(*percentage),
            HostEvent::Log { .. } => None,
        }
    }
}

// ====== RESULT (host -> extension, exactly one, last) ======

/// Terminal reply summarizing the outcome of a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostReply {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yt_dlp_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
}

impl HostReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Failure reply carrying whatever diagnostics the error holds.
    pub fn from_error(err: &HostError) -> Self {
        let mut reply = Self::failure(err.to_string());
        reply.output = err.output().map(String::from);
        reply.exit_code = err.exit_code();
        reply
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_file_path(mut self, path: Option<String>) -> Self {
        self.file_path = path;
        self
    }

    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = Some(exists);
        self
    }

    pub fn with_missing(mut self, missing: Vec<String>, install_command: impl Into<String>) -> Self {
        self.missing = Some(missing);
        self.install_command = Some(install_command.into());
        self
    }

    pub fn with_tool_paths(mut self, yt_dlp: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        self.yt_dlp_path = Some(yt_dlp.into());
        self.ffmpeg_path = Some(ffmpeg.into());
        self
    }
}
