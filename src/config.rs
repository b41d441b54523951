//! TOML configuration of a backup target.
//!
//! ```toml
//! host = "db1.example.com"
//! dbuser = "backup"
//! backup-dir = "/srv/backups/db1"
//! keep = "720h"
//! galera = true
//!
//! [compress]
//! active = true
//! threads = 4
//!
//! [ssh]
//! user = "root"
//! key = "/root/.ssh/id_ed25519"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::remote::scp::DEFAULT_SCP_PROGRAM;
use crate::remote::ssh::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};
use crate::remote::{HostKeyPolicy, SshTarget};
use crate::util::retention::KeepDuration;

/// Config file used when neither `--config` nor `GOX_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "gox.toml";

/// Errors on loading the [Config].
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// The config file can't be read.
    #[display("Reading the config file {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    /// The config file isn't valid TOML or has invalid values.
    #[display("Config file {} is invalid: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The default config can't be serialized.
    #[display("Serializing the default config failed: {_0}")]
    Serialize(toml::ser::Error),
    /// The default config can't be written.
    #[display("Writing the default config to {} failed: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    /// No config existed, a default one was written.
    #[display("No config found, wrote a default one to {}. Set at least 'host' and 'backup-dir' there", path.display())]
    Created { path: PathBuf },
    /// A required key is missing or empty.
    #[display("'{_0}' not found in config")]
    Missing(#[error(ignore)] &'static str),
}

/// Everything needed to back up and restore one database server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Host name or address of the database server.
    #[serde(default)]
    pub host: String,

    /// Database user running xtrabackup.
    #[serde(default)]
    pub dbuser: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbpassword: Option<String>,

    /// Local directory holding one subdirectory per backup.
    #[serde(default)]
    pub backup_dir: PathBuf,

    /// Age after which backups are pruned. Nothing is pruned if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<KeepDuration>,

    /// The server is a Galera cluster node.
    #[serde(default)]
    pub galera: bool,

    /// Remote xtrabackup program.
    #[serde(default = "default_xtrabackup")]
    pub xtrabackup: String,

    #[serde(default)]
    pub compress: CompressConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub restore: RestoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            dbuser: String::new(),
            dbpassword: None,
            backup_dir: PathBuf::new(),
            keep: None,
            galera: false,
            xtrabackup: default_xtrabackup(),
            compress: CompressConfig::default(),
            ssh: SshConfig::default(),
            restore: RestoreConfig::default(),
        }
    }
}

fn default_xtrabackup() -> String {
    "xtrabackup".to_string()
}

/// Compression done by xtrabackup on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompressConfig {
    #[serde(default)]
    pub active: bool,
    /// Number of compression threads, `0` leaves the choice to xtrabackup.
    #[serde(default)]
    pub threads: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    /// Login user, defaults to the local user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key file, defaults to `~/.ssh/id_rsa`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub host_keys: HostKeyPolicy,

    /// Known hosts file, defaults to `~/.ssh/known_hosts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    /// Seconds to wait for the TCP connect and the SSH handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Remote scp program receiving restored backups.
    #[serde(default = "default_scp")]
    pub scp: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            key: None,
            port: default_port(),
            host_keys: HostKeyPolicy::default(),
            known_hosts: None,
            connect_timeout: default_connect_timeout(),
            scp: default_scp(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_scp() -> String {
    DEFAULT_SCP_PROGRAM.to_string()
}

/// Layout of the server a backup is restored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreConfig {
    /// MySQL data directory.
    #[serde(default = "default_datadir")]
    pub datadir: String,

    /// Name of the MySQL service.
    #[serde(default = "default_service")]
    pub service: String,

    /// Remote directory below which the scratch directory is created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            datadir: default_datadir(),
            service: default_service(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn default_datadir() -> String {
    "/var/lib/mysql".to_string()
}

fn default_service() -> String {
    "mysql".to_string()
}

fn default_scratch_dir() -> String {
    "/tmp".to_string()
}

impl Config {
    /// Loads the config at `path`.
    ///
    /// If there is no file at `path` a default config is written there and
    /// [ConfigError::Created] is returned, since it can't name a host.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(config_str) => toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let config_str =
                    toml::to_string_pretty(&Self::default()).map_err(ConfigError::Serialize)?;
                fs::write(path, config_str).map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;

                Err(ConfigError::Created {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Checks the keys a backup needs.
    pub fn validate_backup(&self) -> Result<(), ConfigError> {
        self.validate_restore()?;
        if self.dbuser.trim().is_empty() {
            return Err(ConfigError::Missing("dbuser"));
        }
        Ok(())
    }

    /// Checks the keys a restore needs.
    pub fn validate_restore(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("backup-dir"));
        }
        Ok(())
    }

    /// Where and how to connect via SSH.
    pub fn ssh_target(&self) -> SshTarget {
        let key = self.ssh.key.clone().unwrap_or_else(default_key);
        let mut target = SshTarget::new(&self.host, key)
            .port(self.ssh.port)
            .host_keys(self.ssh.host_keys)
            .connect_timeout(Duration::from_secs(self.ssh.connect_timeout));
        if let Some(user) = &self.ssh.user {
            target = target.user(user);
        }
        if let Some(known_hosts) = &self.ssh.known_hosts {
            target = target.known_hosts(known_hosts);
        }
        target
    }
}

fn default_key() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| "/root".into());
    Path::new(&home).join(".ssh").join("id_rsa")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            host = "db1"
            dbuser = "backup"
            dbpassword = "s3cret"
            backup-dir = "/srv/backups"
            keep = "720h"
            galera = true

            [compress]
            active = true
            threads = 4

            [ssh]
            user = "admin"
            key = "/home/admin/.ssh/id_ed25519"
            port = 2222
            host-keys = "accept-new"
            connect-timeout = 3

            [restore]
            datadir = "/data/mysql"
            service = "mariadb"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "db1");
        assert_eq!(config.dbpassword.as_deref(), Some("s3cret"));
        assert_eq!(config.keep.as_ref().unwrap().to_string(), "720h");
        assert!(config.galera);
        assert_eq!(config.compress.threads, 4);
        assert_eq!(config.ssh.host_keys, HostKeyPolicy::AcceptNew);
        assert_eq!(config.restore.datadir, "/data/mysql");
        assert_eq!(config.restore.scratch_dir, "/tmp");
        assert_eq!(config.xtrabackup, "xtrabackup");
        config.validate_backup().unwrap();
    }

    #[test]
    fn ssh_target_follows_config() {
        let config: Config = toml::from_str(
            r#"
            host = "db1"
            [ssh]
            user = "admin"
            key = "/keys/id"
            port = 2222
            connect-timeout = 3
            "#,
        )
        .unwrap();

        let target = config.ssh_target();

        assert_eq!(target.host, "db1");
        assert_eq!(target.port, 2222);
        assert_eq!(target.user, "admin");
        assert_eq!(target.key_file, Path::new("/keys/id"));
        assert_eq!(target.host_keys, HostKeyPolicy::Strict);
        assert_eq!(target.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_keep_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gox.toml");
        fs::write(&path, "host = \"db1\"\nkeep = \"forever\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn missing_keys_are_reported() {
        let mut config = Config::default();
        assert!(matches!(config.validate_backup(), Err(ConfigError::Missing("host"))));

        config.host = "db1".to_string();
        assert!(matches!(
            config.validate_restore(),
            Err(ConfigError::Missing("backup-dir"))
        ));

        config.backup_dir = PathBuf::from("/srv/backups");
        config.validate_restore().unwrap();
        assert!(matches!(config.validate_backup(), Err(ConfigError::Missing("dbuser"))));
    }

    #[test]
    fn missing_config_writes_a_loadable_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gox.toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Created { .. }), "{err}");

        let written = Config::load(&path).unwrap();
        assert_eq!(written, Config::default());
    }
}
