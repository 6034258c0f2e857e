//! Grouping scalars into extended grapheme clusters.

use std::mem;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{StreamError, StreamResult};

/// Stream of user-perceived characters built from a scalar stream.
///
/// A cluster is only released once a later scalar starts a new one, or the
/// scalars run out, so a base letter and its combining marks always arrive
/// together no matter how the input was chunked. Boundaries follow UAX #29
/// extended grapheme rules. After an error, every later pull returns that
/// error again.
#[derive(Debug)]
pub struct Characters<St> {
    scalars: St,
    pending: String,
    failed: Option<StreamError>,
}

impl<St> Characters<St>
where
    St: Stream<Item = StreamResult<char>> + Unpin,
{
    pub const fn new(scalars: St) -> Self {
        Self {
            scalars,
            pending: String::new(),
            failed: None,
        }
    }

    // Detach the first cluster if a second one has started behind it.
    fn split_first(&mut self) -> Option<String> {
        let (boundary, _) = self.pending.grapheme_indices(true).nth(1)?;
        let rest = self.pending.split_off(boundary);
        Some(mem::replace(&mut self.pending, rest))
    }
}

impl<St> Stream for Characters<St>
where
    St: Stream<Item = StreamResult<char>> + Unpin,
{
    type Item = StreamResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(ref err) = this.failed {
            return Poll::Ready(Some(Err(err.clone())));
        }
        loop {
            match ready!(Pin::new(&mut this.scalars).poll_next(cx)) {
                Some(Ok(c)) => {
                    this.pending.push(c);
                    if let Some(cluster) = this.split_first() {
                        return Poll::Ready(Some(Ok(cluster)));
                    }
                }
                Some(Err(err)) => {
                    this.pending.clear();
                    this.failed = Some(err.clone());
                    return Poll::Ready(Some(Err(err)));
                }
                None if this.pending.is_empty() => return Poll::Ready(None),
                None => return Poll::Ready(Some(Ok(mem::take(&mut this.pending)))),
            }
        }
    }
}
