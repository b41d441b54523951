//! Restore of an xtrabackup archive onto a remote MySQL server.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::{Display, Error};
use shell_escape::unix::escape;

use super::{run_or_die, timestamp, ARCHIVE_NAME};
use crate::config::Config;
use crate::remote::transport::Transport;
use crate::remote::{Connection, ExecError, TransferError};

const ARCHIVE_MODE: &str = "0644";
const GALERA_INFO: &str = "xtrabackup_galera_info";

#[derive(Debug, Display, Error)]
/// Errors on restoring a backup.
pub enum RestoreError {
    /// The selected backup has no archive.
    #[display("Backup archive {} does not exist", path.display())]
    MissingArchive { path: PathBuf },
    /// The archive could not be pushed to the server.
    #[display("Unable to transfer the backup: {_0}")]
    Transfer(TransferError),
    /// A restore step failed.
    #[display("{_0}")]
    Step(ExecError),
    /// The Galera position could not be read from the prepared backup.
    #[display("Unable to get xtrabackup_galera_info: {_0}")]
    GaleraPosition(ExecError),
}

/// Restores one backup onto the configured host.
pub struct Restore {
    archive: PathBuf,
    host: String,
    xtrabackup: String,
    datadir: String,
    service: String,
    scratch_root: String,
    galera: bool,
}

impl Restore {
    /// Restore of the backup named `from` in the configured backup directory.
    ///
    /// `from` may also be an absolute path to a backup directory or archive.
    pub fn with_config(config: &Config, from: &str) -> Self {
        let from = config.backup_dir.join(from);
        let archive = if from.extension().is_some_and(|ext| ext == "xbstream") {
            from
        } else {
            from.join(ARCHIVE_NAME)
        };

        Self {
            archive,
            host: config.host.clone(),
            xtrabackup: config.xtrabackup.clone(),
            datadir: config.restore.datadir.trim_end_matches('/').to_string(),
            service: config.restore.service.clone(),
            scratch_root: config.restore.scratch_dir.clone(),
            galera: config.galera,
        }
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Fails if the archive is not on disk.
    pub fn check_archive(&self) -> Result<(), RestoreError> {
        if self.archive.is_file() {
            Ok(())
        } else {
            Err(RestoreError::MissingArchive {
                path: self.archive.clone(),
            })
        }
    }

    /// Question the operator has to confirm before anything happens.
    pub fn prompt(&self) -> String {
        let from = self.archive.parent().unwrap_or(&self.archive);
        format!("Restoring {} to {} ? (y/N): ", from.display(), self.host)
    }

    /// Restores the archive using a scratch directory named after `now`.
    ///
    /// The scratch directory is created and removed with [run_or_die], so a
    /// failure there ends the process. The directory is removed after a
    /// failed step as well.
    pub fn run<T: Transport>(
        &self,
        conn: &Connection<T>,
        now: NaiveDateTime,
    ) -> Result<(), RestoreError> {
        self.run_with(conn, now, |conn, command| {
            run_or_die(conn, command);
            Ok(())
        })
    }

    fn run_with<T, F>(
        &self,
        conn: &Connection<T>,
        now: NaiveDateTime,
        fatal: F,
    ) -> Result<(), RestoreError>
    where
        T: Transport,
        F: Fn(&Connection<T>, &str) -> Result<(), ExecError>,
    {
        let scratch = format!(
            "{}/{}",
            self.scratch_root.trim_end_matches('/'),
            timestamp(now)
        );
        let scratch_arg = escape(scratch.as_str().into());

        fatal(conn, &format!("mkdir -p {scratch_arg}")).map_err(RestoreError::Step)?;
        let restored = self.steps(conn, &scratch);
        let cleaned = fatal(conn, &format!("rm -rf {scratch_arg}")).map_err(RestoreError::Step);

        restored.and(cleaned)?;
        log::info!(target: "workflow::restore", "Backup restored !");
        Ok(())
    }

    fn steps<T: Transport>(&self, conn: &Connection<T>, scratch: &str) -> Result<(), RestoreError> {
        let remote_archive = format!("{scratch}/{ARCHIVE_NAME}");
        let step = |command: String| conn.run(&command).map_err(RestoreError::Step);

        let dir = escape(scratch.into());
        let archive = escape(remote_archive.as_str().into());
        let datadir = escape(self.datadir.as_str().into());
        let datadir_backup = escape(format!("{}.bck", self.datadir).into());
        let service = escape(self.service.as_str().into());

        log::info!(target: "workflow::restore", "Transferring backup to {}:{remote_archive}", self.host);
        conn.copy_file(&self.archive, &remote_archive, ARCHIVE_MODE)
            .map_err(RestoreError::Transfer)?;

        log::info!(target: "workflow::restore", "Decompressing backup");
        step(format!("xbstream -C {dir} -x < {archive}"))?;
        step(format!(
            "{} --remove-original --decompress --target-dir={dir}/",
            self.xtrabackup
        ))?;

        log::info!(target: "workflow::restore", "Preparing backup");
        step(format!("{} --prepare --target-dir={dir}", self.xtrabackup))?;

        log::info!(target: "workflow::restore", "Shutting down MySQL");
        step(format!("service {service} stop"))?;

        log::info!(target: "workflow::restore", "Moving {} to {}.bck", self.datadir, self.datadir);
        step(format!("rm -rf {datadir_backup}; mv -f {datadir} {datadir_backup}"))?;
        step(format!("mkdir {datadir}"))?;

        log::info!(target: "workflow::restore", "Restoring backup");
        step(format!("{} --copy-back --target-dir={dir}", self.xtrabackup))?;
        step(format!("chown -R mysql:mysql {datadir}/"))?;

        let mut start = format!("service {service} start");
        if self.galera {
            let position = self.galera_position(conn, scratch)?;
            log::debug!(target: "workflow::restore", "Galera start position: {position}");
            start += &format!(" --wsrep_start_position={}", escape(position.into()));
        }

        log::info!(target: "workflow::restore", "Starting MySQL");
        step(start)
    }

    fn galera_position<T: Transport>(
        &self,
        conn: &Connection<T>,
        scratch: &str,
    ) -> Result<String, RestoreError> {
        let info = escape(format!("{scratch}/{GALERA_INFO}").into());
        let output = conn
            .output(&format!("cat {info}"))
            .map_err(RestoreError::GaleraPosition)?;

        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }
}
