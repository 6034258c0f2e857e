//! Lenient UTF-8 decoding of a byte source into Unicode scalars.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;

use super::source::ByteSource;
use super::utf8::{Step, Utf8Assembler};
use crate::error::StreamResult;

/// Stream of `char`s decoded from a [`ByteSource`].
///
/// Malformed input never ends the stream: each orphan continuation byte,
/// invalid lead byte, or cut-short sequence yields one U+FFFD and decoding
/// carries on with the next byte. A sequence truncated by end of input is
/// flushed as U+FFFD before the stream ends.
#[derive(Debug)]
pub struct Scalars<S> {
    source: S,
    assembler: Utf8Assembler,
    // Byte that interrupted a multi-byte sequence; replayed before pulling.
    leftover: Option<u8>,
}

impl<S: ByteSource> Scalars<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            assembler: Utf8Assembler::default(),
            leftover: None,
        }
    }

    /// Give back the underlying source.
    ///
    /// A pending partial sequence or leftover byte is discarded.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: ByteSource + Unpin> Stream for Scalars<S> {
    type Item = StreamResult<char>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let byte = match this.leftover.take() {
                Some(byte) => byte,
                None => match ready!(this.source.poll_next_byte(cx)) {
                    Ok(Some(byte)) => byte,
                    Ok(None) => return Poll::Ready(this.assembler.finish().map(Ok)),
                    Err(err) => return Poll::Ready(Some(Err(err))),
                },
            };

            match this.assembler.push(byte) {
                Step::Pending => {}
                Step::Scalar(c) => return Poll::Ready(Some(Ok(c))),
                Step::Replay(c, byte) => {
                    this.leftover = Some(byte);
                    return Poll::Ready(Some(Ok(c)));
                }
            }
        }
    }
}
