//! Server-sent event framing.
//!
//! Bytes arrive in arbitrary slices; frames are separated by a blank line and
//! carry their payload on `data:` lines.

/// One complete SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
  Data(String),
  Done,
}

/// Stateful SSE parser. Buffers bytes until a frame is complete, so a UTF-8
/// sequence split across network reads is decoded intact.
#[derive(Debug, Default)]
pub struct SseProcessor {
  buffer: Vec<u8>,
}

impl SseProcessor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feeds one network read and returns the frames it completed.
  pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
    // Line endings may be CRLF; payloads are JSON so a bare CR never matters.
    self
      .buffer
      .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    self.drain_frames()
  }

  pub fn push_text(&mut self, text: &str) -> Vec<SseFrame> {
    self.push_bytes(text.as_bytes())
  }

  /// Flushes a trailing frame that was not terminated by a blank line.
  pub fn finish(&mut self) -> Vec<SseFrame> {
    let remaining = std::mem::take(&mut self.buffer);
    parse_frame(&String::from_utf8_lossy(&remaining))
      .into_iter()
      .collect()
  }

  fn drain_frames(&mut self) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some(idx) = find_separator(&self.buffer) {
      let raw: Vec<u8> = self.buffer.drain(..idx + 2).collect();
      if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw[..idx])) {
        frames.push(frame);
      }
    }
    frames
  }
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
  buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
  let mut data: Option<String> = None;
  for line in raw.lines() {
    let Some(payload) = line.strip_prefix("data:") else {
      continue;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    match data.as_mut() {
      Some(existing) => {
        existing.push('\n');
        existing.push_str(payload);
      }
      None => data = Some(payload.to_string()),
    }
  }

  let data = data?;
  if data.trim() == "[DONE]" {
    Some(SseFrame::Done)
  } else {
    Some(SseFrame::Data(data))
  }
}
