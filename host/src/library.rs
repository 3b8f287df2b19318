/// Lookups in the music directory: title sanitization, existing-file checks,
/// newest download.
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::AUDIO_EXTENSION;

/// Characters that cannot appear in file names on common filesystems.
static ILLEGAL_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

/// Replace filesystem-illegal characters with `_` and trim whitespace.
pub fn sanitize_title(title: &str) -> String {
    ILLEGAL_CHARS_RE.replace_all(title, "_").trim().to_string()
}

/// File name a downloaded title is saved under.
pub fn audio_file_name(title: &str) -> String {
    format!("{}.{}", sanitize_title(title), AUDIO_EXTENSION)
}

/// Find an already-downloaded file for `title` in `dir`.
///
/// Tries the exact sanitized name first, then a case-insensitive match on
/// the stem of every audio file. A missing directory is simply no match.
pub fn find_existing(dir: &Path, title: &str) -> std::io::Result<Option<PathBuf>> {
    let exact = dir.join(audio_file_name(title));
    if exact.is_file() {
        return Ok(Some(exact));
    }
    if !dir.is_dir() {
        return Ok(None);
    }

    let wanted = sanitize_title(title).to_lowercase();
    for path in audio_files(dir)? {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem == wanted {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Most recently modified audio file in `dir`.
pub fn newest_audio_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let newest = audio_files(dir)?
        .into_iter()
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path);
    Ok(newest)
}

fn audio_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_audio = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
            .unwrap_or(false);
        if is_audio && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
