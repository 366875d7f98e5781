//! # Message Framing
//!
//! Turns the raw byte stream of a connection into logical messages.
//!
//! Two modes are supported:
//! - [`FramingMode::Chunk`] (default): every read is one message and no
//!   terminator is needed. Clients write one message per send.
//! - [`FramingMode::Line`]: messages are `\n`-terminated. Bytes are buffered
//!   across reads, so coalesced or split TCP segments are handled. An
//!   unterminated tail is still delivered when the peer closes.

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// How inbound bytes are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    #[default]
    Chunk,
    Line,
}

/// Per-connection framing state.
#[derive(Debug)]
pub struct Framer {
    mode: FramingMode,
    max_message_bytes: usize,
    buffer: Vec<u8>,
    /// Set while discarding the remainder of an over-long line.
    discarding: bool,
}

impl Framer {
    pub fn new(mode: FramingMode, max_message_bytes: usize) -> Self {
        Self {
            mode,
            max_message_bytes,
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// Feed one read's worth of bytes and collect the complete messages.
    ///
    /// Each item is either the raw bytes of one message or the protocol error
    /// that caused a message to be dropped. Empty lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        match self.mode {
            FramingMode::Chunk => self.push_chunk(chunk),
            FramingMode::Line => self.push_lines(chunk),
        }
    }

    fn push_chunk(&self, chunk: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        let message = trim_line_end(chunk);
        if message.is_empty() {
            return Vec::new();
        }
        if message.len() > self.max_message_bytes {
            return vec![Err(ProtocolError::TooLarge {
                len: message.len(),
                max: self.max_message_bytes,
            })];
        }
        vec![Ok(message.to_vec())]
    }

    fn push_lines(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        let mut out = Vec::new();

        for piece in chunk.split_inclusive(|b| *b == b'\n') {
            let complete = piece.last() == Some(&b'\n');

            if self.discarding {
                if complete {
                    self.discarding = false;
                }
                continue;
            }

            self.buffer.extend_from_slice(piece);

            if self.buffer.len() > self.max_message_bytes + 2 {
                out.push(Err(ProtocolError::TooLarge {
                    len: self.buffer.len(),
                    max: self.max_message_bytes,
                }));
                self.buffer.clear();
                self.discarding = !complete;
                continue;
            }

            if complete {
                let line = std::mem::take(&mut self.buffer);
                let message = trim_line_end(&line);
                if message.len() > self.max_message_bytes {
                    out.push(Err(ProtocolError::TooLarge {
                        len: message.len(),
                        max: self.max_message_bytes,
                    }));
                } else if !message.is_empty() {
                    out.push(Ok(message.to_vec()));
                }
            }
        }

        out
    }

    /// Flush an unterminated trailing message once the peer has closed.
    pub fn finish(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        let discarding = std::mem::take(&mut self.discarding);
        let tail = std::mem::take(&mut self.buffer);
        if discarding {
            return None;
        }
        let message = trim_line_end(&tail);
        if message.is_empty() {
            return None;
        }
        if message.len() > self.max_message_bytes {
            return Some(Err(ProtocolError::TooLarge {
                len: message.len(),
                max: self.max_message_bytes,
            }));
        }
        Some(Ok(message.to_vec()))
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn trim_line_end(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && matches!(bytes[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(results: Vec<Result<Vec<u8>, ProtocolError>>) -> Vec<String> {
        results
            .into_iter()
            .map(|r| String::from_utf8(r.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_line_mode_splits_coalesced_messages() {
        let mut framer = Framer::new(FramingMode::Line, 1024);
        let out = framer.push(b"REGISTER:p1|English\r\nVOICE:p1|English|hi\n");
        assert_eq!(
            messages(out),
            vec!["REGISTER:p1|English", "VOICE:p1|English|hi"]
        );
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_line_mode_buffers_partial_messages() {
        let mut framer = Framer::new(FramingMode::Line, 1024);
        assert!(framer.push(b"VOICE:p1|Eng").is_empty());
        assert_eq!(framer.pending(), 12);
        let out = framer.push(b"lish|hello\n\n");
        assert_eq!(messages(out), vec!["VOICE:p1|English|hello"]);
    }

    #[test]
    fn test_line_mode_drops_oversized_line_and_recovers() {
        let mut framer = Framer::new(FramingMode::Line, 8);
        let out = framer.push(b"0123456789abcdef");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(ProtocolError::TooLarge { max: 8, .. })));

        // Rest of the long line is discarded, the next one goes through
        assert!(framer.push(b"more\n").is_empty());
        assert_eq!(messages(framer.push(b"p1|ok\n")), vec!["p1|ok"]);
    }

    #[test]
    fn test_line_mode_flushes_unterminated_tail_on_close() {
        let mut framer = Framer::new(FramingMode::Line, 1024);
        assert!(framer.push(b"REGISTER:p1|English").is_empty());
        let tail = framer.finish().unwrap().unwrap();
        assert_eq!(tail, b"REGISTER:p1|English".to_vec());
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_default_mode_needs_no_terminator() {
        let mut framer = Framer::new(FramingMode::default(), 1024);
        assert_eq!(messages(framer.push(b"REGISTER:p1|English")), vec!["REGISTER:p1|English"]);
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_chunk_mode_treats_each_read_as_one_message() {
        let mut framer = Framer::new(FramingMode::Chunk, 1024);
        assert_eq!(messages(framer.push(b"p1|a\nb\n")), vec!["p1|a\nb"]);
        assert!(framer.push(b"\r\n").is_empty());
    }
}
