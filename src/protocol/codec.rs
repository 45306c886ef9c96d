//! Line-based frame codec for the management channel.
//!
//! Wire format (text, UTF-8):
//!
//! ```text
//! FASPMGR 2
//! Key1: Value1
//! Key2: Value2
//!
//! ```
//!
//! A frame is the header line, zero or more `Key: Value` lines split on the
//! first `": "`, and exactly one empty line. Commands written back to the
//! executable use the same grammar with a second trailing blank line.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransferError};
use crate::protocol::event::{EnhancedEvent, EventType};

/// Header line opening every frame
pub const HEADER: &str = "FASPMGR 2";

/// Field separator between key and value
pub const FIELD_SEPARATOR: &str = ": ";

/// Maximum line length (1MB) - a longer line means the channel is corrupted
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

// =============================================================================
// Frame
// =============================================================================

/// One management event or command: an ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(String, String)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame whose first field is `Type: <event_type>`.
    pub fn with_type(event_type: impl Into<String>) -> Self {
        Self::new().field("Type", event_type)
    }

    /// Builder-style insert.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, replacing the value in place if the key exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn event_type(&self) -> EventType {
        self.get("Type").map(EventType::parse).unwrap_or_default()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn enhanced(&self) -> EnhancedEvent {
        EnhancedEvent::from_frame(self)
    }

    /// Encode as a single wire frame.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 2 + self.fields.len() * 24);
        out.push_str(HEADER);
        out.push('\n');
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(FIELD_SEPARATOR);
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Encode as a command for the executable: keys capitalized, two blank
    /// lines at the end.
    pub fn encode_command(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 3 + self.fields.len() * 24);
        out.push_str(HEADER);
        out.push('\n');
        for (key, value) in &self.fields {
            out.push_str(&capitalize(key));
            out.push_str(FIELD_SEPARATOR);
            out.push_str(value);
            out.push('\n');
        }
        out.push_str("\n\n");
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Frame {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut frame = Frame::new();
        for (k, v) in iter {
            frame.insert(k, v);
        }
        frame
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Parser
// =============================================================================

#[derive(Debug)]
enum ParserState {
    AwaitingHeader,
    InFrame(Frame),
}

/// Incremental parser: feed raw bytes, get completed frames.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    state: ParserState,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            state: ParserState::AwaitingHeader,
        }
    }

    /// Consume a chunk of bytes, returning every frame it completes.
    ///
    /// Bytes are decoded as UTF-8, invalid sequences replaced, so non-ASCII
    /// file names never abort a session.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        self.feed_into(data, &mut frames)?;
        Ok(frames)
    }

    /// Like [`feed`](Self::feed), appending to `frames`. Frames completed
    /// before a protocol violation in the same chunk stay in `frames`.
    pub fn feed_into(&mut self, data: &[u8], frames: &mut Vec<Frame>) -> Result<()> {
        self.buf.extend_from_slice(data);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(frame) = self.push_line(&line)? {
                frames.push(frame);
            }
        }

        if self.buf.len() > MAX_LINE_LENGTH {
            let len = self.buf.len();
            self.buf.advance(len);
            return Err(TransferError::Protocol(format!(
                "line exceeds maximum length {}",
                MAX_LINE_LENGTH
            )));
        }

        Ok(())
    }

    /// Process one line (without its terminator).
    pub fn push_line(&mut self, line: &str) -> Result<Option<Frame>> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line == HEADER {
            if matches!(self.state, ParserState::InFrame(_)) {
                return Err(TransferError::Protocol(
                    "header received inside an open frame".to_string(),
                ));
            }
            self.state = ParserState::InFrame(Frame::new());
            return Ok(None);
        }

        if line.is_empty() {
            return match std::mem::replace(&mut self.state, ParserState::AwaitingHeader) {
                ParserState::InFrame(frame) => Ok(Some(frame)),
                ParserState::AwaitingHeader => Err(TransferError::Protocol(
                    "empty line outside of a frame".to_string(),
                )),
            };
        }

        match (&mut self.state, line.split_once(FIELD_SEPARATOR)) {
            (ParserState::InFrame(frame), Some((key, value)))
                if !key.is_empty() && !key.contains(':') =>
            {
                frame.insert(key, value);
                Ok(None)
            }
            _ => Err(TransferError::Protocol(format!("unexpected line: {line:?}"))),
        }
    }

    /// True when a frame is open or a partial line is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty() || matches!(self.state, ParserState::InFrame(_))
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Write a command frame to the management channel.
pub async fn write_command<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, frame: &Frame) -> Result<()> {
    w.write_all(frame.encode_command().as_bytes()).await?;
    w.flush().await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
