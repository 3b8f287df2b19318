/// Native messaging framing.
///
/// Each message is a 4-byte native-endian `u32` length followed by that many
/// bytes of UTF-8 JSON, in both directions. When stdin is an interactive
/// terminal the reader falls back to one JSON document per line.
use std::io::IsTerminal;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::errors::{HostError, HostResult};

/// Length prefix size in bytes.
pub const PREFIX_LEN: usize = 4;

/// Encode a value as a complete frame (prefix + payload).
pub fn encode_frame<T: Serialize>(value: &T) -> HostResult<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        HostError::MalformedMessage(format!(
            "payload of {} bytes does not fit a 4-byte length prefix",
            payload.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + payload.len());
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a frame payload (without length prefix).
pub fn decode_frame<T: DeserializeOwned>(payload: &[u8]) -> HostResult<T> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| HostError::MalformedMessage(format!("payload is not UTF-8: {}", e)))?;
    serde_json::from_str(text).map_err(|e| HostError::MalformedMessage(e.to_string()))
}

/// Reads framed messages from an input stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line_mode: bool,
}

impl FrameReader<tokio::io::Stdin> {
    /// Reader over the process stdin, in line mode when stdin is a terminal.
    pub fn stdin() -> Self {
        let line_mode = std::io::stdin().is_terminal();
        if line_mode {
            debug!("stdin is a terminal, reading newline-delimited JSON");
        }
        Self::new(tokio::io::stdin(), line_mode)
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, line_mode: bool) -> Self {
        Self {
            inner: BufReader::new(inner),
            line_mode,
        }
    }

    /// Read one message.
    ///
    /// Returns `Ok(None)` when the stream is closed before a new message
    /// starts; that is ordinary shutdown, not an error.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> HostResult<Option<T>> {
        if self.line_mode {
            return self.read_line().await;
        }

        let mut prefix = [0u8; PREFIX_LEN];
        let mut filled = 0;
        while filled < PREFIX_LEN {
            let n = self.inner.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(HostError::MalformedMessage(format!(
                    "stream closed after {} of {} length bytes",
                    filled, PREFIX_LEN
                )));
            }
            filled += n;
        }

        let len = u32::from_ne_bytes(prefix) as usize;
        debug!("Reading frame of {} bytes", len);

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                HostError::MalformedMessage(format!("stream closed before {} payload bytes", len))
            } else {
                HostError::Io(e)
            }
        })?;

        decode_frame(&payload).map(Some)
    }

    async fn read_line<T: DeserializeOwned>(&mut self) -> HostResult<Option<T>> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        serde_json::from_str(line.trim())
            .map(Some)
            .map_err(|e| HostError::MalformedMessage(e.to_string()))
    }
}

/// Writes framed messages to an output stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl FrameWriter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message and flush it.
    pub async fn send_message<T: Serialize>(&mut self, value: &T) -> HostResult<()> {
        let frame = encode_frame(value)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        debug!("Sent frame of {} bytes", frame.len() - PREFIX_LEN);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_frame_round_trip() {
        let request = json!({"command": "checkExists", "videoTitle": "Ünïcode: ♫ ?"});
        let reply = json!({"success": true, "exists": true, "message": "ok"});

        let mut writer = FrameWriter::new(Vec::new());
        writer.send_message(&request).await.unwrap();
        writer.send_message(&reply).await.unwrap();
        let bytes = writer.into_inner();

        let mut reader = FrameReader::new(bytes.as_slice(), false);
        let first: Value = reader.read_message().await.unwrap().unwrap();
        let second: Value = reader.read_message().await.unwrap().unwrap();
        assert_eq!(first, request);
        assert_eq!(second, reply);
        assert!(reader.read_message::<Value>().await.unwrap().is_none());
    }

    #[test]
    fn test_prefix_is_native_endian_length() {
        let frame = encode_frame(&json!({"a": 1})).unwrap();
        let payload = br#"{"a":1}"#;
        assert_eq!(&frame[..PREFIX_LEN], &(payload.len() as u32).to_ne_bytes());
        assert_eq!(&frame[PREFIX_LEN..], payload);
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_shutdown() {
        let mut reader = FrameReader::new(&b""[..], false);
        assert!(reader.read_message::<Value>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_malformed() {
        let mut reader = FrameReader::new(&[7u8, 0][..], false);
        let err = reader.read_message::<Value>().await.unwrap_err();
        assert!(matches!(err, HostError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_malformed() {
        let mut bytes = 10u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        let mut reader = FrameReader::new(bytes.as_slice(), false);
        let err = reader.read_message::<Value>().await.unwrap_err();
        assert!(matches!(err, HostError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let payload = b"not json";
        let mut bytes = (payload.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(payload);
        let mut reader = FrameReader::new(bytes.as_slice(), false);
        let err = reader.read_message::<Value>().await.unwrap_err();
        assert!(matches!(err, HostError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let payload = [0xffu8, 0xfe];
        let mut bytes = (payload.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        let mut reader = FrameReader::new(bytes.as_slice(), false);
        let err = reader.read_message::<Value>().await.unwrap_err();
        assert!(matches!(err, HostError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_line_mode() {
        let input = b"{\"command\":\"checkDependencies\"}\n";
        let mut reader = FrameReader::new(&input[..], true);
        let value: Value = reader.read_message().await.unwrap().unwrap();
        assert_eq!(value, json!({"command": "checkDependencies"}));
        assert!(reader.read_message::<Value>().await.unwrap().is_none());
    }
}
