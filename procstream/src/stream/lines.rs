//! Splitting a byte source into decoded lines.
//!
//! Terminators are CR, LF, CR LF (as one), VT, FF, NEL (`C2 85`), LS
//! (`E2 80 A8`) and PS (`E2 80 A9`). Splitting works on raw bytes; each
//! finished line is then decoded leniently, so bad UTF-8 degrades a line's
//! text but never moves a line break.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;

use super::source::ByteSource;
use super::utf8::decode_lossy;
use crate::error::StreamResult;

const LF: u8 = b'\n';
const VT: u8 = 0x0B;
const FF: u8 = 0x0C;
const CR: u8 = b'\r';

/// Progress through a multi-byte terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    None,
    /// Saw `C2`.
    Nel,
    /// Saw `E2`.
    Separator,
    /// Saw `E2 80`.
    SeparatorTail,
}

/// Byte-at-a-time line state machine.
#[derive(Debug)]
struct Splitter {
    line: Vec<u8>,
    probe: Probe,
    // A CR just ended a line; an LF right behind it belongs to the same break.
    skip_lf: bool,
}

impl Splitter {
    const fn new() -> Self {
        Self {
            line: Vec::new(),
            probe: Probe::None,
            skip_lf: false,
        }
    }

    /// Feed one byte. Returns `true` when it completed a terminator.
    fn push(&mut self, byte: u8) -> bool {
        if std::mem::take(&mut self.skip_lf) && byte == LF {
            return false;
        }

        match self.probe {
            Probe::None => match byte {
                CR => {
                    self.skip_lf = true;
                    true
                }
                LF | VT | FF => true,
                0xC2 => {
                    self.probe = Probe::Nel;
                    false
                }
                0xE2 => {
                    self.probe = Probe::Separator;
                    false
                }
                _ => {
                    self.line.push(byte);
                    false
                }
            },
            Probe::Nel => {
                self.probe = Probe::None;
                if byte == 0x85 {
                    return true;
                }
                self.line.extend_from_slice(&[0xC2, byte]);
                false
            }
            Probe::Separator => {
                if byte == 0x80 {
                    self.probe = Probe::SeparatorTail;
                    return false;
                }
                self.probe = Probe::None;
                self.line.extend_from_slice(&[0xE2, byte]);
                false
            }
            Probe::SeparatorTail => {
                self.probe = Probe::None;
                if byte == 0xA8 || byte == 0xA9 {
                    return true;
                }
                self.line.extend_from_slice(&[0xE2, 0x80, byte]);
                false
            }
        }
    }

    fn take_line(&mut self) -> String {
        let text = decode_lossy(&self.line);
        self.line.clear();
        text
    }

    /// End of input: flush a half-seen terminator and any unterminated text.
    fn finish(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.probe, Probe::None) {
            Probe::None => {}
            Probe::Nel => self.line.push(0xC2),
            Probe::Separator => self.line.push(0xE2),
            Probe::SeparatorTail => self.line.extend_from_slice(&[0xE2, 0x80]),
        }
        self.skip_lf = false;
        (!self.line.is_empty()).then(|| self.take_line())
    }
}

/// Stream of lines, without terminators, read from a [`ByteSource`].
///
/// A terminator at the very end of the input does not produce an extra
/// empty line, while text after the last terminator is yielded as a final
/// line. A terminator that ends an empty line yields nothing, so blank
/// lines are skipped.
#[derive(Debug)]
pub struct Lines<S> {
    source: S,
    splitter: Splitter,
}

impl<S: ByteSource> Lines<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source,
            splitter: Splitter::new(),
        }
    }
}

impl<S: ByteSource + Unpin> Stream for Lines<S> {
    type Item = StreamResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let chunk = match ready!(this.source.poll_fill_buf(cx)) {
                Ok(chunk) => chunk,
                Err(err) => return Poll::Ready(Some(Err(err))),
            };
            if chunk.is_empty() {
                return Poll::Ready(this.splitter.finish().map(Ok));
            }

            let hit = chunk.iter().position(|&b| this.splitter.push(b));
            let used = hit.map_or(chunk.len(), |i| i + 1);
            this.source.consume(used);

            if hit.is_some() && !this.splitter.line.is_empty() {
                return Poll::Ready(Some(Ok(this.splitter.take_line())));
            }
        }
    }
}
