//! Async decoding pipeline over blocking byte channels.
//!
//! ```text
//! RawChannel -> ChunkSource -> Scalars -> Characters
//!                           \-> Lines --\
//!                           \-> Lines ---+-> Merge
//! ```
//!
//! Only [`ChunkSource`] ever waits on I/O. Every layer above it is a
//! synchronous state machine advanced whenever the layer below produces
//! something, so a pull never blocks the scheduler for longer than one read.

mod characters;
mod lines;
mod merge;
mod scalars;
mod source;
mod utf8;

#[cfg(test)]
pub(crate) mod testing;

pub use characters::Characters;
pub use lines::Lines;
pub use merge::{merge, Merge};
pub use scalars::Scalars;
pub use source::{
    ByteSource, CancelHandle, ChunkSource, RawChannel, SourceOptions, DEFAULT_CAPACITY,
};

/// Decoding adapters for any [`ByteSource`].
pub trait ByteSourceExt: ByteSource + Sized {
    /// Decode into Unicode scalars.
    fn scalars(self) -> Scalars<Self> {
        Scalars::new(self)
    }

    /// Decode into extended grapheme clusters.
    fn characters(self) -> Characters<Scalars<Self>>
    where
        Self: Unpin,
    {
        Characters::new(Scalars::new(self))
    }

    /// Split into lines.
    fn lines(self) -> Lines<Self> {
        Lines::new(self)
    }
}

impl<S: ByteSource> ByteSourceExt for S {}
