use std::io;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::{Display, Error, From};

/// The private key could not be used.
#[derive(Debug, Display, Error)]
pub enum CredentialError {
    /// The key file can't be read.
    #[display("Unable to read private key {}: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    /// The key file doesn't contain a usable private key.
    #[display("{} does not contain a usable private key: {reason}", path.display())]
    Unparsable { path: PathBuf, reason: String },
}

/// Establishing the connection failed.
#[derive(Debug, Display, Error, From)]
pub enum ConnectError {
    /// Private key problems.
    #[from]
    Credential(CredentialError),
    /// The host name didn't resolve to any address.
    #[display("Unable to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },
    /// TCP connect was refused or failed.
    #[display("Unable to connect to {addr}: {source}")]
    Dial { addr: String, source: io::Error },
    /// TCP connect or SSH handshake didn't finish in time.
    #[display("Connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
    /// SSH protocol setup failed.
    #[display("SSH handshake with {addr} failed: {source}")]
    Handshake { addr: String, source: ssh2::Error },
    /// The server's host key was not accepted.
    #[display("Host key of {addr} rejected: {reason}")]
    HostKey { addr: String, reason: String },
    /// The server refused the public key.
    #[display("Public key authentication as {user} failed: {source}")]
    Auth { user: String, source: ssh2::Error },
}

/// A session could not be minted on an open connection.
#[derive(Debug, Display, Error)]
pub enum SessionError {
    /// The connection was already shut down.
    #[display("Connection is closed")]
    Closed,
    /// The server or transport refused the channel.
    #[display("Opening a session channel failed: {_0}")]
    Open(io::Error),
}

/// A remote command failed.
#[derive(Debug, Display, Error, From)]
pub enum ExecError {
    /// No session to run the command in.
    #[from]
    #[display("{_0}")]
    Session(SessionError),
    /// The server refused to start the command.
    #[display("Unable to start `{command}`: {source}")]
    Start { command: String, source: io::Error },
    /// The command exited with a nonzero status.
    #[display("`{command}` exited with status {status}")]
    Status { command: String, status: i32 },
    /// The command was killed by a signal.
    #[display("`{command}` was killed by signal {signal}")]
    Signal { command: String, signal: String },
    /// Moving bytes between the channel and the local streams failed.
    #[display("Stream of `{command}` failed: {source}")]
    Stream { command: String, source: io::Error },
    /// The stdout drain thread died.
    #[display("Drain of `{command}` stopped unexpectedly")]
    Drain { command: String },
}

/// Pushing a file to the remote host failed.
#[derive(Debug, Display, Error)]
pub enum TransferError {
    /// The permission mode is not four octal digits.
    #[display("Invalid permission mode {_0:?}, expected four octal digits like \"0644\"")]
    InvalidMode(#[error(ignore)] String),
    /// The remote path has no file name component.
    #[display("Remote path {_0:?} has no file name")]
    InvalidRemotePath(#[error(ignore)] String),
    /// The local file can't be opened or stat'd.
    #[display("Unable to read local file {}: {source}", path.display())]
    LocalFile { path: PathBuf, source: io::Error },
    /// The writer side of the push failed.
    #[display("Writing the file to the remote sink failed: {source}")]
    Write { source: io::Error },
    /// The remote sink program failed.
    #[display("Remote sink failed: {_0}")]
    Sink(ExecError),
}
