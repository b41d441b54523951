//! Backup and restore of a remote MySQL server.
//!
//! Both workflows drive a [Connection] with plain remote commands:
//!
//! - [Backup]: streams an `xbstream` archive produced by xtrabackup into a
//!   new timestamped local directory and prunes expired ones.
//! - [Restore]: pushes an archive back, unpacks and prepares it in a scratch
//!   directory and swaps it in as the MySQL data directory.

use std::process;

use chrono::NaiveDateTime;

use crate::remote::transport::Transport;
use crate::remote::Connection;
use crate::util::retention::TIMESTAMP_FORMAT;

pub mod backup;
pub mod restore;

pub use backup::{Backup, BackupError};
pub use restore::{Restore, RestoreError};

/// File name of the archive inside a backup directory.
pub const ARCHIVE_NAME: &str = "backup.xbstream";

/// Name of the backup (or scratch) directory created at `now`.
pub fn timestamp(now: NaiveDateTime) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Runs `command` and terminates the process if it fails.
pub fn run_or_die<T: Transport>(conn: &Connection<T>, command: &str) {
    if let Err(e) = conn.run(command) {
        die(format_args!("Unable to run {command}: {e}"));
    }
}

/// Logs `error` and exits with status 1.
pub fn die(error: impl std::fmt::Display) -> ! {
    log::error!(target: "workflow", "{error}");
    process::exit(1)
}
