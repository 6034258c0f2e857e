//! Incremental, lenient UTF-8 assembly.
//!
//! [`Utf8Assembler`] is fed one byte at a time and reports a scalar as soon as
//! the bytes seen so far settle one. Malformed input never fails: an orphan
//! continuation byte or an invalid lead becomes U+FFFD on its own, and a
//! sequence cut short by a non-continuation byte collapses into a single
//! U+FFFD while the interrupting byte is handed back for replay.

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// More continuation bytes are expected.
    Pending,
    /// A scalar is complete.
    Scalar(char),
    /// The pending sequence was interrupted. The scalar it decoded to comes
    /// first, then the byte must be fed again as the start of the next one.
    Replay(char, u8),
}

#[derive(Debug, Default)]
pub(crate) struct Utf8Assembler {
    buf: [u8; 4],
    len: usize,
    want: usize,
}

impl Utf8Assembler {
    pub(crate) fn push(&mut self, byte: u8) -> Step {
        if self.len == 0 {
            return self.start(byte);
        }

        if !is_continuation(byte) {
            return Step::Replay(self.take(), byte);
        }

        self.buf[self.len] = byte;
        self.len += 1;
        if self.len == self.want {
            Step::Scalar(self.take())
        } else {
            Step::Pending
        }
    }

    /// Flush a truncated sequence at end of input.
    pub(crate) fn finish(&mut self) -> Option<char> {
        (self.len > 0).then(|| self.take())
    }

    fn start(&mut self, lead: u8) -> Step {
        match sequence_len(lead) {
            Some(1) => Step::Scalar(char::from(lead)),
            Some(want) => {
                self.buf[0] = lead;
                self.len = 1;
                self.want = want;
                Step::Pending
            }
            None => Step::Scalar(char::REPLACEMENT_CHARACTER),
        }
    }

    fn take(&mut self) -> char {
        let scalar = decode_one(&self.buf[..self.len]);
        self.len = 0;
        self.want = 0;
        scalar
    }
}

/// Total sequence length announced by a lead byte, by bit pattern alone.
///
/// Continuation bytes and `0xF8..=0xFF` announce nothing.
const fn sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC0..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF7 => Some(4),
        _ => None,
    }
}

const fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

// Overlong forms, surrogates and truncated runs all land on U+FFFD here.
fn decode_one(bytes: &[u8]) -> char {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Decode a complete byte run with the same recovery rules as the scalar stream.
pub(crate) fn decode_lossy(bytes: &[u8]) -> String {
    // Fast path: most lines are valid.
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_owned();
    }

    let mut out = String::with_capacity(bytes.len());
    let mut assembler = Utf8Assembler::default();
    for &byte in bytes {
        match assembler.push(byte) {
            Step::Pending => {}
            Step::Scalar(c) => out.push(c),
            Step::Replay(c, byte) => {
                out.push(c);
                // A fresh start never replays.
                if let Step::Scalar(c) = assembler.push(byte) {
                    out.push(c);
                }
            }
        }
    }
    if let Some(c) = assembler.finish() {
        out.push(c);
    }
    out
}
