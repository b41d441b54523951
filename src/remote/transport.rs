//! Seams between the executor and the SSH library.

use std::io;

use super::SessionError;

/// How a remote command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with a status code.
    Code(i32),
    /// Terminated by a signal, named without the `SIG` prefix.
    Signal(String),
}

/// Something that can mint session channels on one authenticated connection.
pub trait Transport {
    type Channel: RemoteChannel;

    /// Opens a fresh channel for exactly one command.
    fn open_channel(&self) -> Result<Self::Channel, SessionError>;
}

/// A single session channel.
///
/// Reads and writes are non-blocking: they return [io::ErrorKind::WouldBlock]
/// when nothing can be transferred right now. `read_*` return `Ok(0)` once the
/// remote side closed the stream.
pub trait RemoteChannel: Send {
    /// Starts `command` on the remote host.
    fn exec(&mut self, command: &str) -> io::Result<()>;

    /// Sends bytes to the command's stdin. Returns how many were accepted.
    fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Signals EOF on the command's stdin.
    fn close_stdin(&mut self) -> io::Result<()>;

    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocks until the remote side closed the channel and reports the exit.
    fn finish(&mut self) -> io::Result<ExitStatus>;

    /// Releases the channel. Must be safe to call after [finish](Self::finish).
    fn close(&mut self) -> io::Result<()>;
}
