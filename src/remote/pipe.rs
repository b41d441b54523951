//! Bounded in-memory byte pipe between the session pump and a local task.
//!
//! The pipe holds at most [PIPE_SLOTS] chunks of up to [CHUNK_SIZE] bytes, so
//! a writer that outruns its reader blocks instead of buffering the whole
//! stream. Dropping the writer is end-of-stream for the reader; dropping the
//! reader makes further writes fail with [io::ErrorKind::BrokenPipe].

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, RecvError, Sender, TryRecvError};

/// Largest chunk handed through the pipe in one piece.
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Number of chunks the pipe buffers before the writer blocks.
pub const PIPE_SLOTS: usize = 4;

/// Creates a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(PIPE_SLOTS);
    let writer = PipeWriter { tx };
    let reader = PipeReader {
        rx,
        chunk: Vec::new(),
        pos: 0,
    };

    (writer, reader)
}

/// Writing half of a [pipe].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(CHUNK_SIZE);
        self.tx
            .send(buf[..len].to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading half of a [pipe].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

/// Result of polling a [PipeReader] without blocking.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Poll {
    Ready(Vec<u8>),
    Pending,
    Closed,
}

impl PipeReader {
    /// Takes the next buffered chunk without blocking.
    pub(crate) fn poll_chunk(&mut self) -> Poll {
        if self.pos < self.chunk.len() {
            let rest = self.chunk.split_off(self.pos);
            self.chunk.clear();
            self.pos = 0;
            return Poll::Ready(rest);
        }

        match self.rx.try_recv() {
            Ok(chunk) => Poll::Ready(chunk),
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(RecvError) => return Ok(0),
            }
        }

        let available = &self.chunk[self.pos..];
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.pos += len;
        Ok(len)
    }
}
