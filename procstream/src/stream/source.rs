//! Buffered bridge from a blocking byte channel to pull-based async iteration.
//!
//! A [`ChunkSource`] owns one reusable buffer. When the consumer has drained
//! it, the source hands both the channel and the buffer to tokio's blocking
//! pool, waits for the read to come back, and resumes delivery from the start
//! of the buffer. Because the buffer travels with the read, there is never
//! more than one read in flight per source and a waiting consumer can never
//! observe half-written bytes.

use std::future::{poll_fn, Future};
use std::io::{self, Read};
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::task::AtomicWaker;
use futures::Stream;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{StreamError, StreamResult};

/// Default refill size.
pub const DEFAULT_CAPACITY: usize = 16384;

/// A raw, possibly blocking byte channel.
///
/// `read_chunk` fills up to `buf.len()` bytes and returns how many were
/// written; `0` means end of stream. It runs on a blocking worker, never on
/// the async scheduler. Every [`Read`] type that can be sent to that worker
/// already qualifies.
pub trait RawChannel: Send + 'static {
    /// Read the next chunk into `buf`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read + Send + 'static> RawChannel for R {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Pull access to a buffered byte source.
///
/// Mirrors `BufRead`: `poll_fill_buf` exposes the unread bytes (refilling if
/// needed, empty at end of stream) and `consume` marks some of them as read.
pub trait ByteSource {
    /// Poll for the currently buffered bytes.
    fn poll_fill_buf(&mut self, cx: &mut Context<'_>) -> Poll<StreamResult<&[u8]>>;

    /// Mark `amt` buffered bytes as read.
    fn consume(&mut self, amt: usize);

    /// Poll for a single byte. `Ok(None)` is end of stream.
    fn poll_next_byte(&mut self, cx: &mut Context<'_>) -> Poll<StreamResult<Option<u8>>> {
        let byte = match ready!(self.poll_fill_buf(cx)) {
            Ok(chunk) => chunk.first().copied(),
            Err(err) => return Poll::Ready(Err(err)),
        };
        if byte.is_some() {
            self.consume(1);
        }
        Poll::Ready(Ok(byte))
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn poll_fill_buf(&mut self, cx: &mut Context<'_>) -> Poll<StreamResult<&[u8]>> {
        (**self).poll_fill_buf(cx)
    }

    fn consume(&mut self, amt: usize) {
        (**self).consume(amt);
    }
}

/// Options for a [`ChunkSource`].
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Bytes requested per refill.
    pub capacity: usize,

    /// Name used in log events (e.g. `stdout`).
    pub label: String,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            label: "source".to_string(),
        }
    }
}

impl SourceOptions {
    /// Create options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refill size. Zero is bumped to one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the label used in log events.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Cancels a [`ChunkSource`] from outside the task that consumes it.
///
/// A consumer parked on a refill is woken and fails with
/// [`StreamError::Cancelled`]; so does every later pull. The blocking read
/// itself is not interrupted, its result is just dropped when it returns.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.waker.wake();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    fn register(&self, cx: &Context<'_>) {
        self.inner.waker.register(cx.waker());
    }
}

struct Refill<R> {
    channel: R,
    buf: Vec<u8>,
    result: io::Result<usize>,
}

enum State<R> {
    /// Channel is home; buffer may still hold unread bytes.
    Idle(R),
    /// Channel and buffer are out on the blocking pool.
    Reading(JoinHandle<Refill<R>>),
    /// The channel reported end of stream.
    Exhausted,
    /// Terminal failure, replayed on every pull.
    Failed(StreamError),
}

/// Single-buffer byte source over a blocking [`RawChannel`].
///
/// Must be polled from within a tokio runtime, since refills are dispatched
/// with [`tokio::task::spawn_blocking`].
pub struct ChunkSource<R> {
    state: State<R>,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
    capacity: usize,
    label: String,
    cancel: CancelHandle,
}

// The channel is never pinned in place; it only moves between the source and
// the blocking pool by value.
impl<R> Unpin for ChunkSource<R> {}

impl<R: RawChannel> ChunkSource<R> {
    /// Wrap `channel` with the default options.
    pub fn new(channel: R) -> Self {
        Self::with_options(channel, SourceOptions::default())
    }

    /// Wrap `channel` with explicit options.
    pub fn with_options(channel: R, options: SourceOptions) -> Self {
        let capacity = options.capacity.max(1);
        Self {
            state: State::Idle(channel),
            buf: vec![0; capacity],
            pos: 0,
            end: 0,
            capacity,
            label: options.label,
            cancel: CancelHandle::default(),
        }
    }

    /// Bytes requested per refill.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// A handle that can cancel this source from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether a refill is currently outstanding.
    pub const fn is_reading(&self) -> bool {
        matches!(self.state, State::Reading(_))
    }

    /// Wait for buffered bytes. An empty slice means end of stream.
    pub async fn fill_buf(&mut self) -> StreamResult<&[u8]> {
        let len = poll_fn(|cx| self.poll_fill_buf(cx).map_ok(<[u8]>::len)).await?;
        Ok(&self.buf[self.pos..self.pos + len])
    }

    /// Pull the next byte. `Ok(None)` means end of stream.
    pub async fn next_byte(&mut self) -> StreamResult<Option<u8>> {
        poll_fn(|cx| self.poll_next_byte(cx)).await
    }

    fn start_refill(&mut self, mut channel: R) {
        let mut buf = mem::take(&mut self.buf);
        self.pos = 0;
        self.end = 0;
        let handle = tokio::task::spawn_blocking(move || {
            let result = loop {
                match channel.read_chunk(&mut buf) {
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    other => break other,
                }
            };
            Refill {
                channel,
                buf,
                result,
            }
        });
        self.state = State::Reading(handle);
    }

    fn finish_refill(&mut self, refill: Refill<R>) {
        self.buf = refill.buf;
        match refill.result {
            Ok(0) => {
                debug!(source = %self.label, "end of stream");
                self.state = State::Exhausted;
            }
            Ok(n) => {
                trace!(source = %self.label, bytes = n, "refilled");
                self.end = n.min(self.buf.len());
                self.state = State::Idle(refill.channel);
            }
            Err(err) => {
                warn!(source = %self.label, error = %err, "read failed");
                self.state = State::Failed(err.into());
            }
        }
    }

    fn abandon(&mut self) {
        if self.is_reading() {
            debug!(source = %self.label, "cancelled during refill, read abandoned");
        } else {
            debug!(source = %self.label, "cancelled");
        }
        // Dropping the join handle detaches the blocking read.
        self.state = State::Failed(StreamError::Cancelled);
        self.pos = 0;
        self.end = 0;
    }
}

impl<R: RawChannel> ByteSource for ChunkSource<R> {
    fn poll_fill_buf(&mut self, cx: &mut Context<'_>) -> Poll<StreamResult<&[u8]>> {
        loop {
            if let State::Failed(err) = &self.state {
                return Poll::Ready(Err(err.clone()));
            }
            if self.cancel.is_cancelled() {
                self.abandon();
                continue;
            }
            if self.pos < self.end {
                return Poll::Ready(Ok(&self.buf[self.pos..self.end]));
            }

            match mem::replace(&mut self.state, State::Exhausted) {
                State::Exhausted => return Poll::Ready(Ok(&[][..])),
                State::Idle(channel) => self.start_refill(channel),
                State::Reading(mut handle) => {
                    self.cancel.register(cx);
                    if self.cancel.is_cancelled() {
                        self.state = State::Reading(handle);
                        self.abandon();
                        continue;
                    }
                    match Pin::new(&mut handle).poll(cx) {
                        Poll::Pending => {
                            self.state = State::Reading(handle);
                            return Poll::Pending;
                        }
                        Poll::Ready(Ok(refill)) => self.finish_refill(refill),
                        Poll::Ready(Err(join_err)) => {
                            warn!(source = %self.label, error = %join_err, "read worker lost");
                            self.state = State::Failed(io::Error::other(join_err).into());
                        }
                    }
                }
                State::Failed(err) => self.state = State::Failed(err),
            }
        }
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.end);
    }
}

impl<R: RawChannel> Stream for ChunkSource<R> {
    type Item = StreamResult<u8>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_byte(cx).map(Result::transpose)
    }
}

impl<R> std::fmt::Debug for ChunkSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Reading(_) => "reading",
            State::Exhausted => "exhausted",
            State::Failed(_) => "failed",
        };
        f.debug_struct("ChunkSource")
            .field("label", &self.label)
            .field("state", &state)
            .field("buffered", &(self.end - self.pos))
            .field("capacity", &self.capacity)
            .finish()
    }
}
