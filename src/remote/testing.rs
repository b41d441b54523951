//! In-memory transport for tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::transport::{ExitStatus, RemoteChannel, Transport};
use super::SessionError;

/// Largest write the fake channel accepts at once, like a small SSH window.
const WINDOW: usize = 8 * 1024;

type Responder = Arc<dyn Fn(&str, &[u8]) -> Reply + Send + Sync>;
type StdinPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Scripted outcome of one remote command.
#[derive(Clone, Debug)]
pub struct Reply {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit: ExitStatus,
}

impl Reply {
    pub fn ok() -> Self {
        Self::status(0)
    }

    pub fn status(status: i32) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: ExitStatus::Code(status),
        }
    }

    pub fn signal(signal: &str) -> Self {
        Self {
            exit: ExitStatus::Signal(signal.to_string()),
            ..Self::ok()
        }
    }

    pub fn stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Everything a [FakeTransport] saw.
#[derive(Debug, Default)]
pub struct Activity {
    pub opened: usize,
    pub closed: usize,
    pub commands: Vec<String>,
    /// Stdin received per command, in execution order.
    pub stdin: Vec<(String, Vec<u8>)>,
}

pub struct FakeChannel {
    responder: Responder,
    waits_for_stdin: StdinPredicate,
    refuse_exec: bool,
    command: Option<String>,
    stdin: Arc<Mutex<Vec<u8>>>,
    stdin_closed: bool,
    reply: Option<Reply>,
    stdout_pos: usize,
    stderr_pos: usize,
    closed: Arc<AtomicBool>,
    activity: Option<Arc<Mutex<Activity>>>,
}

impl FakeChannel {
    fn new(responder: Responder, waits_for_stdin: StdinPredicate) -> Self {
        Self {
            responder,
            waits_for_stdin,
            refuse_exec: false,
            command: None,
            stdin: Arc::default(),
            stdin_closed: false,
            reply: None,
            stdout_pos: 0,
            stderr_pos: 0,
            closed: Arc::default(),
            activity: None,
        }
    }

    /// A channel answering every command with `reply`.
    pub fn replying(reply: Reply) -> Self {
        Self::new(Arc::new(move |_, _| reply.clone()), Arc::new(|_| false))
    }

    pub fn refusing_exec() -> Self {
        let mut channel = Self::replying(Reply::ok());
        channel.refuse_exec = true;
        channel
    }

    /// Holds back the reply until stdin reached EOF.
    pub fn waiting_for_stdin(mut self) -> Self {
        self.waits_for_stdin = Arc::new(|_| true);
        self
    }

    pub fn stdin_log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.stdin)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn reply(&mut self) -> io::Result<&Reply> {
        let Some(command) = &self.command else {
            return Err(io::Error::other("command not started"));
        };

        if self.reply.is_none() {
            if (self.waits_for_stdin)(command) && !self.stdin_closed {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let stdin = self.stdin.lock().unwrap().clone();
            self.reply = Some((self.responder)(command, &stdin));
        }

        Ok(self.reply.as_ref().unwrap())
    }
}

fn serve(data: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
    let len = (data.len() - *pos).min(buf.len());
    buf[..len].copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;
    len
}

impl RemoteChannel for FakeChannel {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        if let Some(activity) = &self.activity {
            activity.lock().unwrap().commands.push(command.to_string());
        }
        if self.refuse_exec {
            return Err(io::Error::other("exec refused"));
        }
        self.command = Some(command.to_string());
        Ok(())
    }

    fn write_stdin(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.stdin_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let len = data.len().min(WINDOW);
        self.stdin.lock().unwrap().extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn close_stdin(&mut self) -> io::Result<()> {
        self.stdin_closed = true;
        Ok(())
    }

    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reply()?;
        let reply = self.reply.as_ref().unwrap();
        Ok(serve(&reply.stdout, &mut self.stdout_pos, buf))
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reply()?;
        let reply = self.reply.as_ref().unwrap();
        Ok(serve(&reply.stderr, &mut self.stderr_pos, buf))
    }

    fn finish(&mut self) -> io::Result<ExitStatus> {
        Ok(self.reply()?.exit.clone())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(activity) = &self.activity {
            let mut activity = activity.lock().unwrap();
            activity.closed += 1;
            if let Some(command) = &self.command {
                let stdin = self.stdin.lock().unwrap().clone();
                activity.stdin.push((command.clone(), stdin));
            }
        }
        Ok(())
    }
}

/// Transport whose commands are answered by a closure.
pub struct FakeTransport {
    responder: Responder,
    waits_for_stdin: StdinPredicate,
    closed: bool,
    pub activity: Arc<Mutex<Activity>>,
}

impl FakeTransport {
    /// Answers each command with `responder(command, stdin)`.
    ///
    /// Commands running the scp sink wait for their stdin to reach EOF before
    /// replying.
    pub fn new(responder: impl Fn(&str, &[u8]) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            waits_for_stdin: Arc::new(|command| command.contains(" -t ")),
            closed: false,
            activity: Arc::default(),
        }
    }

    /// Every command succeeds without output.
    pub fn succeeding() -> Self {
        Self::new(|_, _| Reply::ok())
    }

    /// Minting sessions fails as if the connection was gone.
    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::succeeding()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.activity.lock().unwrap().commands.clone()
    }
}

impl Transport for FakeTransport {
    type Channel = FakeChannel;

    fn open_channel(&self) -> Result<FakeChannel, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        self.activity.lock().unwrap().opened += 1;
        let mut channel = FakeChannel::new(
            Arc::clone(&self.responder),
            Arc::clone(&self.waits_for_stdin),
        );
        channel.activity = Some(Arc::clone(&self.activity));
        Ok(channel)
    }
}
