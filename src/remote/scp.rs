//! Writer side of the single-file `scp -t` push.
//!
//! The wire format is one control record `C<mode> <size> <basename>\n`,
//! followed by exactly `size` bytes of content and a single NUL byte. The
//! acknowledgments the sink writes back are not read.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use super::TransferError;

/// Remote program receiving pushed files.
pub const DEFAULT_SCP_PROGRAM: &str = "/usr/bin/scp";

/// Four digit octal permission mode, e.g. `0644`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMode(String);

impl FromStr for FileMode {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 4 && s.bytes().all(|b| (b'0'..=b'7').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(TransferError::InvalidMode(s.to_string()))
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last component of a remote (POSIX) path.
pub fn remote_basename(remote_path: &str) -> Result<&str, TransferError> {
    let trimmed = remote_path.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." {
        return Err(TransferError::InvalidRemotePath(remote_path.to_string()));
    }
    Ok(name)
}

pub fn control_record(mode: &FileMode, size: u64, basename: &str) -> String {
    format!("C{mode} {size} {basename}\n")
}

/// Writes one complete push of `content` onto `sink`.
///
/// Fails if `content` yields a different number of bytes than `size`,
/// since the sink would otherwise misread the stream. Bytes past `size` never
/// reach the sink.
pub fn push<R: Read, W: Write>(
    mut sink: W,
    mut content: R,
    mode: &FileMode,
    size: u64,
    basename: &str,
) -> io::Result<u64> {
    sink.write_all(control_record(mode, size, basename).as_bytes())?;

    let copied = io::copy(&mut (&mut content).take(size), &mut sink)?;
    if copied < size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("announced {size} bytes but the file yielded {copied}"),
        ));
    }

    let mut extra = [0u8; 1];
    if read_some(&mut content, &mut extra)? > 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file grew beyond the announced {size} bytes"),
        ));
    }

    sink.write_all(b"\0")?;
    sink.flush()?;
    log::trace!(target: "remote::scp", "Pushed {size} bytes of {basename}");

    Ok(copied)
}

fn read_some(content: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match content.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            read => return read,
        }
    }
}
