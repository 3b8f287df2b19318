/// yt-dlp output classification.
///
/// Every output line becomes a log event; download progress lines also
/// produce a progress event and destination lines name the output file.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use ytm_shared::ipc_protocol::HostEvent;

const PROGRESS_MARKER: &str = "[download]";
const DESTINATION_MARKER: &str = "Destination:";

// ====== REGEX PATTERNS ======

/// First decimal number immediately followed by `%`.
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.?\d*)%").unwrap());

/// Final audio file written after extraction.
static DESTINATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Destination: (.+\.m4a)").unwrap());

/// What a single output line means.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedLine {
    /// Events to forward, in order.
    pub events: Vec<HostEvent>,
    /// Output file announced by this line.
    pub destination: Option<String>,
}

/// Split a raw output chunk into trimmed, non-empty lines.
///
/// Progress redraws separated by `\r` count as separate lines.
pub fn split_lines(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .split(|c: char| c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Classify one trimmed line.
pub fn parse_line(line: &str) -> ParsedLine {
    let mut parsed = ParsedLine {
        events: vec![HostEvent::log(line)],
        destination: None,
    };

    if line.contains(PROGRESS_MARKER) && line.contains('%') {
        match extract_percentage(line) {
            Some(percentage) => parsed.events.push(HostEvent::progress(percentage)),
            None => parsed.events.push(HostEvent::log(format!(
                "[ERROR] Progress parsing failed: no percentage in {:?}",
                line
            ))),
        }
    }

    if line.contains(DESTINATION_MARKER) {
        parsed.destination = extract_destination(line);
        if parsed.destination.is_none() {
            debug!("Destination line without audio file: {}", line);
        }
    }

    parsed
}

/// Percentage from a progress line, e.g. `[download]  42.5% of 3.00MiB`.
pub fn extract_percentage(line: &str) -> Option<f64> {
    let cap = PERCENT_RE.captures(line)?;
    cap[1].parse().ok()
}

/// Audio file path from a destination line.
pub fn extract_destination(line: &str) -> Option<String> {
    DESTINATION_RE.captures(line).map(|cap| cap[1].to_string())
}
