//! Library to backup and restore remote MySQL and Galera servers with
//! [xtrabackup][xb] over SSH.
//!
//! Remote command execution and the file push live in [`remote`], the
//! backup and restore procedures built on top of it in [`workflows`].
//!
//! [xb]: https://docs.percona.com/percona-xtrabackup/latest/

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod remote;
pub mod util;
pub mod workflows;
