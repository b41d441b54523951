use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;

use super::scp::{self, FileMode, DEFAULT_SCP_PROGRAM};
use super::session::{Redirect, Session};
use super::ssh::{SshTarget, SshTransport};
use super::transport::Transport;
use super::{ConnectError, ExecError, SessionError, TransferError};

/// An authenticated connection to one remote host.
///
/// Every operation mints its own [Session] and closes it before returning,
/// whatever the outcome. The connection is meant to be driven by a single
/// orchestrating thread.
pub struct Connection<T: Transport = SshTransport> {
    transport: T,
    redirect: Redirect,
    scp_program: String,
}

impl Connection {
    /// Dials `target` and authenticates.
    pub fn connect(target: &SshTarget, redirect: Redirect) -> Result<Self, ConnectError> {
        Ok(Self::new(target.connect()?, redirect))
    }

    pub fn disconnect(self) {
        self.transport.disconnect();
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps an established transport. New sessions get `redirect` applied.
    pub fn new(transport: T, redirect: Redirect) -> Self {
        Self {
            transport,
            redirect,
            scp_program: DEFAULT_SCP_PROGRAM.to_string(),
        }
    }

    /// Remote program used as sink by [copy_file](Self::copy_file).
    pub fn with_scp_program(mut self, program: impl Into<String>) -> Self {
        self.scp_program = program.into();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mints a fresh session wired to the configured [Redirect].
    pub fn session(&self) -> Result<Session<T::Channel>, SessionError> {
        let channel = self.transport.open_channel()?;
        Ok(Session::new(channel, self.redirect))
    }

    /// Runs `command` and waits for it to exit.
    pub fn run(&self, command: &str) -> Result<(), ExecError> {
        self.session()?.run(command)
    }

    /// Runs `command` and returns everything it wrote to stdout.
    pub fn output(&self, command: &str) -> Result<Vec<u8>, ExecError> {
        let mut captured = Vec::new();
        self.stream_to(command, &mut captured)?;
        Ok(captured)
    }

    /// Runs `command` while a drain thread copies its stdout into `sink`.
    ///
    /// Returns once both the command and the drain finished, so every byte
    /// the command produced is in `sink` (and flushed) on success.
    pub fn stream_to<W: Write + Send>(&self, command: &str, sink: W) -> Result<u64, ExecError> {
        let mut session = self.session()?;
        let stdout = session.stdout_pipe();

        thread::scope(|scope| {
            let drain = scope.spawn(move || drain(stdout, sink));

            let ran = session.run(command);
            let drained = drain.join();

            // a failing sink breaks the pipe under the session, so its error
            // is the cause of whatever the session reports
            let copied = match drained {
                Ok(Ok(copied)) => copied,
                Ok(Err(source)) => {
                    return Err(ExecError::Stream {
                        command: command.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(ExecError::Drain {
                        command: command.to_string(),
                    })
                }
            };
            ran?;

            log::debug!(target: "remote::session", "Drained {copied} bytes from `{command}`");
            Ok(copied)
        })
    }

    /// Pushes the local file at `local` to `remote` with permission `mode`.
    ///
    /// The local file is opened before any session exists. The writer
    /// thread and the remote sink run concurrently; the first one to fail
    /// determines the error.
    pub fn copy_file(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        mode: &str,
    ) -> Result<(), TransferError> {
        let local = local.as_ref();
        let mode: FileMode = mode.parse()?;

        let local_error = |source| TransferError::LocalFile {
            path: local.to_path_buf(),
            source,
        };
        let file = File::open(local).map_err(local_error)?;
        let size = file.metadata().map_err(local_error)?.len();

        log::info!(target: "remote::scp", "Copying {} ({size} bytes) to {remote}", local.display());
        self.push(file, size, remote, &mode)
    }

    /// Pushes `size` bytes from `content` to `remote`.
    pub(crate) fn push<R: Read + Send>(
        &self,
        content: R,
        size: u64,
        remote: &str,
        mode: &FileMode,
    ) -> Result<(), TransferError> {
        let basename = scp::remote_basename(remote)?;
        let command = format!(
            "{} -t {}",
            self.scp_program,
            shell_escape::unix::escape(remote.into())
        );

        let mut session = self.session().map_err(|e| TransferError::Sink(e.into()))?;
        session.discard_stdout();
        let stdin = session.stdin_pipe();

        thread::scope(|scope| {
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            let writer = scope.spawn(move || {
                let pushed = scp::push(stdin, content, mode, size, basename);
                let _ = done_tx.send(());
                pushed
            });

            let ran = session.run(&command);
            // the writer finished before the sink did if it already reported
            let writer_first = done_rx.try_recv().is_ok();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("writer thread panicked")));

            match (written, ran) {
                (Err(source), Err(_)) if writer_first => Err(TransferError::Write { source }),
                (_, Err(e)) => Err(TransferError::Sink(e)),
                (Err(source), Ok(())) => Err(TransferError::Write { source }),
                (Ok(_), Ok(())) => Ok(()),
            }
        })
    }
}

fn drain<W: Write>(mut stdout: impl Read, mut sink: W) -> io::Result<u64> {
    let copied = io::copy(&mut stdout, &mut sink)?;
    sink.flush()?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::remote::testing::{FakeTransport, Reply};

    fn connection(transport: FakeTransport) -> Connection<FakeTransport> {
        Connection::new(transport, Redirect::none())
    }

    fn counts(conn: &Connection<FakeTransport>) -> (usize, usize) {
        let activity = conn.transport().activity.lock().unwrap();
        (activity.opened, activity.closed)
    }

    #[test]
    fn run_opens_and_closes_one_session() {
        let conn = connection(FakeTransport::succeeding());

        conn.run("true").unwrap();

        assert_eq!(counts(&conn), (1, 1));
        assert_eq!(conn.transport().commands(), ["true"]);
    }

    #[test]
    fn run_reports_exit_status_and_still_closes() {
        let conn = connection(FakeTransport::new(|_, _| Reply::status(2)));

        let err = conn.run("false").unwrap_err();

        assert!(matches!(err, ExecError::Status { status: 2, .. }));
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn run_on_closed_connection_is_a_session_error() {
        let conn = connection(FakeTransport::closed());

        let err = conn.run("true").unwrap_err();

        assert!(matches!(err, ExecError::Session(SessionError::Closed)));
    }

    #[test]
    fn output_returns_all_stdout() {
        let conn = connection(FakeTransport::new(|_, _| {
            Reply::ok().stdout("position:42\n").stderr("a warning\n")
        }));

        let out = conn.output("cat xtrabackup_galera_info").unwrap();

        assert_eq!(out, b"position:42\n");
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn output_of_large_stream_does_not_deadlock() {
        const SIZE: usize = 10 * 1024 * 1024;
        let conn = connection(FakeTransport::new(|_, _| {
            Reply::ok().stdout(vec![b'x'; SIZE])
        }));

        let out = conn.output("head -c 10M /dev/zero").unwrap();

        assert_eq!(out.len(), SIZE);
    }

    #[test]
    fn output_of_failing_command_is_an_error() {
        let conn = connection(FakeTransport::new(|_, _| Reply::status(1).stdout("partial")));

        assert!(conn.output("cat missing").is_err());
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn stream_to_counts_and_flushes() {
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 7) as u8).collect();
        let expected = payload.clone();
        let conn = connection(FakeTransport::new(move |_, _| Reply::ok().stdout(payload.clone())));

        let mut sink = Cursor::new(Vec::new());
        let copied = conn.stream_to("xtrabackup --backup", &mut sink).unwrap();

        assert_eq!(copied, expected.len() as u64);
        assert_eq!(sink.into_inner(), expected);
    }

    #[test]
    fn stream_to_reports_a_failing_sink() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let conn = connection(FakeTransport::new(|_, _| Reply::ok().stdout(vec![0; 100_000])));

        let err = conn.stream_to("xtrabackup --backup", Full).unwrap_err();

        assert!(matches!(err, ExecError::Stream { .. }), "{err}");
        assert!(err.to_string().contains("disk full"), "{err}");
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn copy_file_emits_exact_wire_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.bin");
        std::fs::write(&local, b"hello").unwrap();
        let conn = connection(FakeTransport::succeeding());

        conn.copy_file(&local, "/tmp/x/local.bin", "0644").unwrap();

        let activity = conn.transport().activity.lock().unwrap();
        assert_eq!(activity.commands, ["/usr/bin/scp -t /tmp/x/local.bin"]);
        assert_eq!(activity.stdin.len(), 1);
        assert_eq!(activity.stdin[0].1, b"C0644 5 local.bin\nhello\0");
        assert_eq!((activity.opened, activity.closed), (1, 1));
    }

    #[test]
    fn copy_file_streams_files_larger_than_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup.xbstream");
        let content: Vec<u8> = (0..2_000_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&local, &content).unwrap();
        let conn = connection(FakeTransport::succeeding());

        conn.copy_file(&local, "/tmp/restore/backup.xbstream", "0600").unwrap();

        let activity = conn.transport().activity.lock().unwrap();
        let wire = &activity.stdin[0].1;
        let header = format!("C0600 {} backup.xbstream\n", content.len());
        assert!(wire.starts_with(header.as_bytes()));
        assert_eq!(&wire[header.len()..wire.len() - 1], content.as_slice());
        assert_eq!(wire.last(), Some(&0));
    }

    #[test]
    fn copy_file_quotes_the_remote_path() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f");
        std::fs::write(&local, b"").unwrap();
        let conn = connection(FakeTransport::succeeding()).with_scp_program("scp");

        conn.copy_file(&local, "/tmp/my dir/f", "0644").unwrap();

        assert_eq!(conn.transport().commands(), ["scp -t '/tmp/my dir/f'"]);
    }

    #[test]
    fn copy_file_of_missing_file_never_opens_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection(FakeTransport::succeeding());

        let err = conn
            .copy_file(dir.path().join("missing"), "/tmp/x/missing", "0644")
            .unwrap_err();

        assert!(matches!(err, TransferError::LocalFile { .. }));
        assert_eq!(counts(&conn), (0, 0));
    }

    #[test]
    fn copy_file_rejects_invalid_mode_before_anything_else() {
        let conn = connection(FakeTransport::succeeding());

        let err = conn.copy_file("/nonexistent", "/tmp/x", "rw").unwrap_err();

        assert!(matches!(err, TransferError::InvalidMode(_)));
        assert_eq!(counts(&conn), (0, 0));
    }

    #[test]
    fn copy_file_fails_when_sink_fails() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.bin");
        std::fs::write(&local, b"hello").unwrap();
        let conn = connection(FakeTransport::new(|_, _| {
            Reply::status(1).stderr("scp: /tmp/x: No such file or directory\n")
        }));

        let err = conn.copy_file(&local, "/tmp/x/local.bin", "0644").unwrap_err();

        assert!(matches!(err, TransferError::Sink(ExecError::Status { .. })), "{err}");
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn push_fails_when_writer_fails_even_if_sink_succeeds() {
        struct Flaky(usize);
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::other("read error"));
                }
                let n = self.0.min(buf.len());
                buf[..n].fill(b'a');
                self.0 -= n;
                Ok(n)
            }
        }

        let conn = connection(FakeTransport::succeeding());
        let mode = "0644".parse().unwrap();

        let err = conn.push(Flaky(3), 10, "/tmp/x/f", &mode).unwrap_err();

        assert!(matches!(err, TransferError::Write { .. }), "{err}");
        assert_eq!(counts(&conn), (1, 1));
    }

    #[test]
    fn push_to_closed_connection_is_a_sink_error() {
        let conn = connection(FakeTransport::closed());
        let mode = "0644".parse().unwrap();

        let err = conn.push(&b"x"[..], 1, "/tmp/f", &mode).unwrap_err();

        assert!(matches!(
            err,
            TransferError::Sink(ExecError::Session(SessionError::Closed))
        ));
    }
}
