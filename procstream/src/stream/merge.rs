//! Fan-in of two fallible streams in arrival order.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::{StreamError, StreamResult};

/// Interleaves two streams, yielding whichever item is ready first.
///
/// Each side keeps its own order; there is no ordering between sides. The
/// sides are polled in alternating order so a chatty side cannot starve the
/// other. The merge ends once both sides have ended. The first error from
/// either side ends the merge: both sides are dropped and every later pull
/// reports that error again.
#[derive(Debug)]
pub struct Merge<A, B> {
    a: Option<A>,
    b: Option<B>,
    b_first: bool,
    failed: Option<StreamError>,
}

/// Merge two streams. See [`Merge`].
pub const fn merge<A, B>(a: A, b: B) -> Merge<A, B> {
    Merge {
        a: Some(a),
        b: Some(b),
        b_first: false,
        failed: None,
    }
}

fn poll_side<St>(slot: &mut Option<St>, cx: &mut Context<'_>) -> Poll<Option<St::Item>>
where
    St: Stream + Unpin,
{
    let Some(stream) = slot.as_mut() else {
        return Poll::Ready(None);
    };
    let polled = Pin::new(stream).poll_next(cx);
    if matches!(polled, Poll::Ready(None)) {
        *slot = None;
    }
    polled
}

impl<A, B, T> Merge<A, B>
where
    A: Stream<Item = StreamResult<T>> + Unpin,
    B: Stream<Item = StreamResult<T>> + Unpin,
{
    fn poll_one(&mut self, b: bool, cx: &mut Context<'_>) -> Poll<Option<StreamResult<T>>> {
        if b {
            poll_side(&mut self.b, cx)
        } else {
            poll_side(&mut self.a, cx)
        }
    }
}

impl<A, B, T> Stream for Merge<A, B>
where
    A: Stream<Item = StreamResult<T>> + Unpin,
    B: Stream<Item = StreamResult<T>> + Unpin,
{
    type Item = StreamResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(err) = &this.failed {
            return Poll::Ready(Some(Err(err.clone())));
        }

        let first = this.b_first;
        this.b_first = !first;
        for side in [first, !first] {
            match this.poll_one(side, cx) {
                Poll::Ready(Some(Ok(item))) => return Poll::Ready(Some(Ok(item))),
                Poll::Ready(Some(Err(err))) => {
                    this.a = None;
                    this.b = None;
                    this.failed = Some(err.clone());
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) | Poll::Pending => {}
            }
        }

        if this.a.is_none() && this.b.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{Gated, Scripted};
    use crate::stream::{ByteSourceExt, ChunkSource};
    use std::io;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn lines_of(items: &[&str]) -> tokio_stream::Iter<std::vec::IntoIter<StreamResult<String>>> {
        tokio_stream::iter(
            items
                .iter()
                .map(|s| Ok((*s).to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_merge_keeps_each_side_in_order() {
        let merged: Vec<String> = merge(lines_of(&["a1", "a2"]), lines_of(&["b1"]))
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(merged.len(), 3);
        assert!(merged.contains(&"b1".to_string()));
        let a1 = merged.iter().position(|l| l == "a1").unwrap();
        let a2 = merged.iter().position(|l| l == "a2").unwrap();
        assert!(a1 < a2);
    }

    #[tokio::test]
    async fn test_merge_ends_when_both_end() {
        let empty = lines_of(&[]);
        let merged: Vec<String> = merge(empty, lines_of(&["only"]))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(merged, vec!["only"]);

        let mut none = merge(lines_of(&[]), lines_of(&[]));
        assert!(none.next().await.is_none());
    }

    #[tokio::test]
    async fn test_merge_alternates_between_ready_sides() {
        let merged: Vec<String> = merge(lines_of(&["a1", "a2", "a3"]), lines_of(&["b1", "b2", "b3"]))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(merged, vec!["a1", "b1", "a2", "b2", "a3", "b3"]);
    }

    #[tokio::test]
    async fn test_merge_error_is_terminal() {
        let failing = tokio_stream::iter(vec![
            Ok("a1".to_string()),
            Err(StreamError::from(io::Error::new(io::ErrorKind::BrokenPipe, "a died"))),
            Ok("a2".to_string()),
        ]);
        let mut merged = merge(failing, lines_of(&["b1", "b2", "b3", "b4"]));

        let mut seen = Vec::new();
        let err = loop {
            match merged.next().await.unwrap() {
                Ok(line) => seen.push(line),
                Err(err) => break err,
            }
        };
        assert_eq!(err.io_kind(), Some(io::ErrorKind::BrokenPipe));
        assert!(seen.contains(&"a1".to_string()));
        assert!(!seen.contains(&"a2".to_string()));

        let again = merged.next().await.unwrap().unwrap_err();
        assert_eq!(again.io_kind(), Some(io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_blocked_side_does_not_stall_other() {
        let (gated, feed) = Gated::new();
        let slow = ChunkSource::new(gated).lines();
        let fast = ChunkSource::new(Scripted::chunks(&[b"b1\n", b"b2\n"])).lines();
        let mut merged = merge(slow, fast);

        let first_two = tokio::time::timeout(Duration::from_secs(5), async {
            let one = merged.next().await.unwrap().unwrap();
            let two = merged.next().await.unwrap().unwrap();
            (one, two)
        })
        .await
        .expect("fast side must not wait for the blocked one");
        assert_eq!(first_two, ("b1".to_string(), "b2".to_string()));

        feed.send(b"a1\n".to_vec()).unwrap();
        drop(feed);
        let rest: Vec<String> = merged.map(Result::unwrap).collect().await;
        assert_eq!(rest, vec!["a1"]);
    }
}
