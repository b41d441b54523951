use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::remote::HostKeyPolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Config file of the server to work on.
    #[arg(long, env = "GOX_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Overrides the host key verification of the config file.
    #[arg(long, value_enum)]
    pub host_keys: Option<HostKeyPolicy>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Backup a remote MySQL server.
    Backup(BackupArgs),
    /// Restore a backup on a remote host.
    Restore(RestoreArgs),
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Only log which expired backups would be removed.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Name of the backup directory to restore, e.g. `2018-02-01--15-16-55`.
    #[arg(long)]
    pub from: String,

    /// Don't ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Asks `prompt` on stdout and reads the answer from `input`.
///
/// Only `y` or `Y` confirm.
pub fn confirm(prompt: &str, mut input: impl BufRead) -> io::Result<bool> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}
