//! Errors surfaced by the decoding pipeline.

use std::io;
use std::sync::Arc;

/// Terminal failure of a byte, scalar, character or line sequence.
///
/// Once a sequence has reported an error it keeps reporting the same one on
/// every later pull, so the type is cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The underlying channel failed with something other than an interrupt.
    #[error("read failed: {0}")]
    Read(Arc<io::Error>),

    /// The sequence was cancelled through its [`CancelHandle`](crate::stream::CancelHandle).
    #[error("stream was cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this error is a deliberate cancellation rather than an I/O failure.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The I/O error kind behind a read failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Read(err) => Some(err.kind()),
            Self::Cancelled => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Read(Arc::new(err))
    }
}

/// Result alias used throughout the stream layers.
pub type StreamResult<T> = Result<T, StreamError>;
