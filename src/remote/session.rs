//! Single-use remote command sessions.

use std::io::{self, Write};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use derive_more::{Display, Error};

use super::pipe::{self, PipeReader, PipeWriter, Poll, CHUNK_SIZE};
use super::transport::{ExitStatus, RemoteChannel};
use super::ExecError;

/// Pause of the pump when neither direction made progress.
const IDLE_WAIT: Duration = Duration::from_millis(2);

/// A standard stream of the local process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum StdStream {
    #[display("stdin")]
    Stdin,
    #[display("stdout")]
    Stdout,
    #[display("stderr")]
    Stderr,
}

/// Name of a standard stream is unknown.
#[derive(Debug, Display, Error)]
#[display("Unknown standard stream: {_0}")]
pub struct UnknownStream(#[error(ignore)] String);

impl FromStr for StdStream {
    type Err = UnknownStream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdin" => Ok(Self::Stdin),
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            other => Err(UnknownStream(other.to_string())),
        }
    }
}

/// Which local standard streams every new session is wired to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Redirect {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl Redirect {
    /// No stream is wired to the local process.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, stream: StdStream) -> bool {
        match stream {
            StdStream::Stdin => self.stdin,
            StdStream::Stdout => self.stdout,
            StdStream::Stderr => self.stderr,
        }
    }
}

impl FromIterator<StdStream> for Redirect {
    fn from_iter<I: IntoIterator<Item = StdStream>>(iter: I) -> Self {
        let mut redirect = Self::none();
        for stream in iter {
            match stream {
                StdStream::Stdin => redirect.stdin = true,
                StdStream::Stdout => redirect.stdout = true,
                StdStream::Stderr => redirect.stderr = true,
            }
        }
        redirect
    }
}

/// Destination of bytes the remote command produces on one stream.
enum Sink {
    Discard,
    /// Relay complete lines to the log.
    Log(Vec<u8>),
    Writer(Box<dyn Write + Send>),
}

impl Sink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Sink::Discard => Ok(()),
            Sink::Log(partial) => {
                partial.extend_from_slice(data);
                while let Some(end) = partial.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = partial.drain(..=end).collect();
                    log_remote_line(&line);
                }
                Ok(())
            }
            Sink::Writer(writer) => writer.write_all(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Discard => Ok(()),
            Sink::Log(partial) => {
                if !partial.is_empty() {
                    log_remote_line(partial);
                    partial.clear();
                }
                Ok(())
            }
            Sink::Writer(writer) => writer.flush(),
        }
    }
}

fn log_remote_line(line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end();
    if !line.is_empty() {
        log::warn!(target: "remote::session", "{line}");
    }
}

/// Local state of the remote command's stdin.
enum Stdin {
    /// Forward the local process stdin once the command runs.
    Local,
    Feeding {
        source: PipeReader,
        pending: Vec<u8>,
        offset: usize,
    },
    /// Source is exhausted, EOF still has to reach the remote side.
    Eof,
    Closed,
}

/// One remote command execution context.
///
/// A session is consumed by [run](Self::run), so it can't be reused for a
/// second command. Streams default to the [Redirect] of the connection it was
/// minted from and can be replaced by pipes before running.
pub struct Session<C: RemoteChannel> {
    channel: C,
    stdin: Stdin,
    stdout: Sink,
    stderr: Sink,
}

impl<C: RemoteChannel> Session<C> {
    pub(crate) fn new(channel: C, redirect: Redirect) -> Self {
        let stdin = if redirect.stdin {
            Stdin::Local
        } else {
            Stdin::Eof
        };
        let stdout = if redirect.stdout {
            Sink::Writer(Box::new(io::stdout()))
        } else {
            Sink::Discard
        };
        let stderr = if redirect.stderr {
            Sink::Writer(Box::new(io::stderr()))
        } else {
            Sink::Log(Vec::new())
        };

        Self {
            channel,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Replaces the command's stdin with a pipe the caller writes to.
    ///
    /// Dropping the returned writer closes the remote stdin.
    pub fn stdin_pipe(&mut self) -> PipeWriter {
        let (writer, reader) = pipe::pipe();
        self.stdin = feed(reader);
        writer
    }

    /// Replaces the command's stdout with a pipe the caller reads from.
    ///
    /// The reader must be drained while [run](Self::run) is in progress,
    /// otherwise the remote command stalls once the pipe is full.
    pub fn stdout_pipe(&mut self) -> PipeReader {
        let (writer, reader) = pipe::pipe();
        self.stdout = Sink::Writer(Box::new(writer));
        reader
    }

    /// Drops everything the command writes to stdout.
    pub fn discard_stdout(&mut self) {
        self.stdout = Sink::Discard;
    }

    /// Runs `command` to completion and closes the session.
    pub fn run(mut self, command: &str) -> Result<(), ExecError> {
        log::debug!(target: "remote::session", "Running: {command}");
        let result = self.drive(command);

        if let Err(e) = self.channel.close() {
            log::trace!(target: "remote::session", "Closing channel of `{command}` failed: {e}");
        }

        result
    }

    fn drive(&mut self, command: &str) -> Result<(), ExecError> {
        self.channel
            .exec(command)
            .map_err(|source| ExecError::Start {
                command: command.to_string(),
                source,
            })?;

        let stream_error = |source| ExecError::Stream {
            command: command.to_string(),
            source,
        };
        self.pump().map_err(stream_error)?;

        match self.channel.finish().map_err(stream_error)? {
            ExitStatus::Code(0) => {
                log::trace!(target: "remote::session", "`{command}` finished");
                Ok(())
            }
            ExitStatus::Code(status) => Err(ExecError::Status {
                command: command.to_string(),
                status,
            }),
            ExitStatus::Signal(signal) => Err(ExecError::Signal {
                command: command.to_string(),
                signal,
            }),
        }
    }

    /// Moves bytes in both directions until the remote side hit EOF on
    /// stdout and stderr.
    fn pump(&mut self) -> io::Result<()> {
        let mut buf = vec![0; CHUNK_SIZE];
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            let mut progressed = self.feed_stdin()?;

            if stdout_open {
                match self.channel.read_stdout(&mut buf) {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        self.stdout.write(&buf[..n])?;
                        progressed = true;
                    }
                    Err(e) if is_retry(&e) => {}
                    Err(e) => return Err(e),
                }
            }

            if stderr_open {
                match self.channel.read_stderr(&mut buf) {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        self.stderr.write(&buf[..n])?;
                        progressed = true;
                    }
                    Err(e) if is_retry(&e) => {}
                    Err(e) => return Err(e),
                }
            }

            if !progressed {
                thread::sleep(IDLE_WAIT);
            }
        }

        self.stdout.flush()?;
        self.stderr.flush()?;
        // the consumer of a stdout pipe sees EOF from here on
        self.stdout = Sink::Discard;

        Ok(())
    }

    /// Pushes pending stdin bytes to the channel. Returns whether anything
    /// moved.
    fn feed_stdin(&mut self) -> io::Result<bool> {
        match &mut self.stdin {
            Stdin::Local => {
                self.stdin = feed(forward_local_stdin());
                Ok(false)
            }
            Stdin::Feeding {
                source,
                pending,
                offset,
            } => {
                if *offset == pending.len() {
                    match source.poll_chunk() {
                        Poll::Ready(chunk) => {
                            *pending = chunk;
                            *offset = 0;
                        }
                        Poll::Pending => return Ok(false),
                        Poll::Closed => {
                            self.stdin = Stdin::Eof;
                            return Ok(true);
                        }
                    }
                }

                match self.channel.write_stdin(&pending[*offset..]) {
                    Ok(n) => {
                        *offset += n;
                        Ok(n > 0)
                    }
                    Err(e) if is_retry(&e) => Ok(false),
                    Err(e) => {
                        // the remote side stopped reading; dropping the
                        // source surfaces the failure to the writer
                        log::debug!(target: "remote::session", "Remote stdin closed early: {e}");
                        self.stdin = Stdin::Closed;
                        Ok(true)
                    }
                }
            }
            Stdin::Eof => match self.channel.close_stdin() {
                Ok(()) => {
                    self.stdin = Stdin::Closed;
                    Ok(true)
                }
                Err(e) if is_retry(&e) => Ok(false),
                Err(e) => {
                    log::debug!(target: "remote::session", "Sending EOF failed: {e}");
                    self.stdin = Stdin::Closed;
                    Ok(true)
                }
            },
            Stdin::Closed => Ok(false),
        }
    }
}

fn feed(source: PipeReader) -> Stdin {
    Stdin::Feeding {
        source,
        pending: Vec::new(),
        offset: 0,
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Copies the local process stdin into a pipe on a background thread.
///
/// The thread ends once local stdin is exhausted or the session dropped the
/// reading half.
fn forward_local_stdin() -> PipeReader {
    let (mut writer, reader) = pipe::pipe();
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        if let Err(e) = io::copy(&mut stdin, &mut writer) {
            log::trace!(target: "remote::session", "Forwarding local stdin stopped: {e}");
        }
    });
    reader
}
