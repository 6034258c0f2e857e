//! procstream - spawn processes and read their output as async text streams.
//!
//! The [`stream`] module turns a blocking byte channel (a pipe, a file, stdin)
//! into pull-based sequences of bytes, Unicode scalars, grapheme clusters or
//! lines, and can merge two line streams in arrival order. The [`process`]
//! module is a thin spawning layer that wires a child's stdout and stderr
//! into that pipeline.

pub mod error;
pub mod process;
pub mod stream;

pub use error::{StreamError, StreamResult};
