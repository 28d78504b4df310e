//! Incremental server-sent-events decoder for streaming completions.
//!
//! Bytes arrive in arbitrary chunks; a line (and a UTF-8 sequence) may be
//! split across chunk boundaries, so undecoded bytes are buffered until the
//! next newline.

/// One decoded SSE data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    /// A `data:` payload (JSON for chat completions).
    Payload(String),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Line-buffering SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete `data:` line it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = parse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseData> {
        let line = std::mem::take(&mut self.buf);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<SseData> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);

    // Comments (":keep-alive"), event/id fields and blank separators carry no data.
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Payload(data.to_string()))
}
