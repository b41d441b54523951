//! Remote command execution and file transfer over SSH.
//!
//! A [Connection] wraps one authenticated SSH transport. Each operation on it
//! mints a fresh single-use [Session], runs exactly one remote command and
//! closes the session again:
//!
//! - [Connection::run] runs a command and waits for it.
//! - [Connection::output] captures the command's stdout.
//! - [Connection::stream_to] copies stdout into a local writer while the
//!   command runs.
//! - [Connection::copy_file] pushes a local file through `scp -t`.

mod connection;
mod error;
pub mod pipe;
pub mod scp;
mod session;
pub mod ssh;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::Connection;
pub use error::{ConnectError, CredentialError, ExecError, SessionError, TransferError};
pub use scp::FileMode;
pub use session::{Redirect, Session, StdStream, UnknownStream};
pub use ssh::{HostKeyPolicy, SshTarget, SshTransport};
