use std::io;

use chrono::Local;
use clap::Parser;

use gox_lib::cli::{self, Action, BackupArgs, Cli, RestoreArgs};
use gox_lib::config::Config;
use gox_lib::remote::{Connection, Redirect, StdStream};
use gox_lib::workflows::{die, Backup, Restore};

fn main() {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    let mut config = Config::load(&cli.config).unwrap_or_else(|e| die(e));
    if let Some(policy) = cli.host_keys {
        config.ssh.host_keys = policy;
    }

    match cli.action {
        Action::Backup(args) => backup(&config, args),
        Action::Restore(args) => restore(&config, args),
    }
}

fn backup(config: &Config, BackupArgs { dry_run }: BackupArgs) {
    config.validate_backup().unwrap_or_else(|e| die(e));
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let redirect: Redirect = [StdStream::Stderr].into_iter().collect();
    let conn = Connection::connect(&config.ssh_target(), redirect)
        .unwrap_or_else(|e| die(e))
        .with_scp_program(&config.ssh.scp);

    let backup = Backup::with_config(config, dry_run);
    let now = Local::now().naive_local();
    if let Err(e) = backup.run(&conn, now) {
        die(e);
    }

    conn.disconnect();
}

fn restore(config: &Config, RestoreArgs { from, yes }: RestoreArgs) {
    config.validate_restore().unwrap_or_else(|e| die(e));

    let restore = Restore::with_config(config, &from);
    restore.check_archive().unwrap_or_else(|e| die(e));

    if !yes {
        let confirmed = cli::confirm(&restore.prompt(), io::stdin().lock())
            .unwrap_or_else(|e| die(format!("Reading the confirmation failed: {e}")));
        if !confirmed {
            return;
        }
    }

    let redirect: Redirect = [StdStream::Stdout, StdStream::Stderr].into_iter().collect();
    let conn = Connection::connect(&config.ssh_target(), redirect)
        .unwrap_or_else(|e| die(e))
        .with_scp_program(&config.ssh.scp);

    let now = Local::now().naive_local();
    if let Err(e) = restore.run(&conn, now) {
        die(e);
    }

    conn.disconnect();
}
