//! Scripted channels for exercising chunk boundaries in tests.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

/// Run a future to completion on a fresh current-thread runtime.
///
/// For property tests, which cannot be `async`.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(future)
}

/// Counts `read` calls made on a channel.
#[derive(Debug, Clone, Default)]
pub struct ReadCounter(Arc<AtomicUsize>);

impl ReadCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fixed list of chunks (or errors), then end of stream.
///
/// A chunk longer than the caller's buffer is split across reads.
#[derive(Debug)]
pub struct Scripted {
    steps: VecDeque<io::Result<Vec<u8>>>,
    reads: ReadCounter,
}

impl Scripted {
    pub fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            steps: steps.into(),
            reads: ReadCounter::default(),
        }
    }

    pub fn chunks(chunks: &[&[u8]]) -> Self {
        Self::new(chunks.iter().map(|c| Ok(c.to_vec())).collect())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::chunks(&[bytes])
    }

    /// Split `bytes` at the given offsets.
    pub fn split_at(bytes: &[u8], cuts: &[usize]) -> Self {
        let mut cuts: Vec<usize> = cuts.iter().map(|&c| c.min(bytes.len())).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            if cut > start {
                chunks.push(Ok(bytes[start..cut].to_vec()));
                start = cut;
            }
        }
        if start < bytes.len() {
            chunks.push(Ok(bytes[start..].to_vec()));
        }
        Self::new(chunks)
    }

    /// One chunk per byte.
    pub fn bytewise(bytes: &[u8]) -> Self {
        Self::new(bytes.iter().map(|&b| Ok(vec![b])).collect())
    }

    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.bump();
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Err(err)) => Err(err),
            Some(Ok(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.steps.push_front(Ok(chunk[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

/// Blocks each read until the test feeds a chunk; dropping the sender ends the stream.
#[derive(Debug)]
pub struct Gated {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    reads: ReadCounter,
}

impl Gated {
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let gated = Self {
            rx,
            pending: Vec::new(),
            reads: ReadCounter::default(),
        };
        (gated, tx)
    }

    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }
}

impl Read for Gated {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.bump();
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
