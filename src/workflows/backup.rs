//! Streaming backup of a remote MySQL server with xtrabackup.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::{Display, Error};

use super::{timestamp, ARCHIVE_NAME};
use crate::config::Config;
use crate::remote::transport::Transport;
use crate::remote::{Connection, ExecError};
use crate::util::retention::{self, KeepDuration};

#[derive(Debug, Display, Error)]
/// Errors on taking a backup.
pub enum BackupError {
    /// The local backup directory or archive can't be created.
    #[display("Unable to create {}: {source}", path.display())]
    Target { path: PathBuf, source: io::Error },
    /// Running xtrabackup or storing its stream failed.
    #[display("Streaming the backup failed: {_0}")]
    Stream(ExecError),
}

/// Takes a backup into a new timestamped directory of `backup_dir`.
pub struct Backup {
    backup_dir: PathBuf,
    command: String,
    keep: Option<KeepDuration>,
    dry_run: bool,
}

impl Backup {
    pub fn with_config(config: &Config, dry_run: bool) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            command: xtrabackup_command(config),
            keep: config.keep.clone(),
            dry_run,
        }
    }

    /// Remote command writing the archive to its stdout.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Streams a backup taken at `now` to disk and prunes expired backups.
    ///
    /// Returns the path of the archive. A failed backup leaves no directory
    /// behind.
    pub fn run<T: Transport>(
        &self,
        conn: &Connection<T>,
        now: NaiveDateTime,
    ) -> Result<PathBuf, BackupError> {
        let target_dir = self.backup_dir.join(timestamp(now));
        if target_dir.is_relative() {
            log::warn!(target: "workflow::backup", "Backup directory is relative: {}", target_dir.display());
        }

        let archive = create_archive(&target_dir)?;
        log::info!(target: "workflow::backup", "Streaming backup to {}", archive.display());

        let file = File::create_new(&archive).map_err(|source| BackupError::Target {
            path: archive.clone(),
            source,
        })?;
        match conn.stream_to(&self.command, BufWriter::new(file)) {
            Ok(written) => {
                log::info!(target: "workflow::backup", "Backup done, {written} bytes written to {}", archive.display());
            }
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&target_dir) {
                    log::warn!(target: "workflow::backup", "Unable to remove incomplete backup {}: {rm}", target_dir.display());
                }
                return Err(BackupError::Stream(e));
            }
        }

        if let Some(keep) = &self.keep {
            log::info!(target: "workflow::backup", "Removing backups older than {keep}");
            if let Err(e) = retention::prune(&self.backup_dir, keep, now, self.dry_run) {
                log::error!(target: "workflow::backup", "Pruning {} failed: {e}", self.backup_dir.display());
            }
        }

        Ok(archive)
    }
}

/// Creates the fresh backup directory and returns the archive path in it.
fn create_archive(target_dir: &Path) -> Result<PathBuf, BackupError> {
    let target_error = |source| BackupError::Target {
        path: target_dir.to_path_buf(),
        source,
    };
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent).map_err(target_error)?;
    }
    fs::create_dir(target_dir).map_err(target_error)?;

    Ok(target_dir.join(ARCHIVE_NAME))
}

/// Builds the xtrabackup invocation streaming an `xbstream` to stdout.
pub fn xtrabackup_command(config: &Config) -> String {
    let mut command = format!(
        "{} --backup --stream=xbstream --user={}",
        config.xtrabackup,
        shell_escape::unix::escape(config.dbuser.as_str().into())
    );

    if let Some(password) = config.dbpassword.as_deref().filter(|p| !p.is_empty()) {
        command += &format!(" --password={}", shell_escape::unix::escape(password.into()));
    }

    if config.compress.active {
        command += " --compress";
        if config.compress.threads != 0 {
            command += &format!(" --compress-threads {}", config.compress.threads);
        }
    }

    if config.galera {
        command += " --galera-info";
    }

    command
}
