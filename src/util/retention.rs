//! Age based retention of timestamped backup directories.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta};
use derive_more::{Display, Error};

/// Format of backup directory names, e.g. `2024-03-01--02-30-00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d--%H-%M-%S";

/// How long backups are kept, written as `<integer><unit>` groups.
///
/// Units are `s`, `m`, `h`, `d` and `w`, so `720h`, `30d` and `1w3d12h` are
/// all valid.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeepDuration {
    text: String,
    secs: i64,
}

/// A keep duration could not be parsed.
#[derive(Debug, Display, Error)]
#[display("Invalid keep duration {_0:?}, expected something like \"720h\" or \"7d\"")]
pub struct InvalidKeepDuration(#[error(ignore)] String);

impl KeepDuration {
    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.secs)
    }
}

impl FromStr for KeepDuration {
    type Err = InvalidKeepDuration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidKeepDuration(s.to_string());

        let mut secs: i64 = 0;
        let mut digits = String::new();
        for c in s.trim().chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }

            let unit: i64 = match c {
                's' => 1,
                'm' => 60,
                'h' => 60 * 60,
                'd' => 24 * 60 * 60,
                'w' => 7 * 24 * 60 * 60,
                _ => return Err(invalid()),
            };
            let amount: i64 = digits.parse().map_err(|_| invalid())?;
            secs = amount
                .checked_mul(unit)
                .and_then(|group| secs.checked_add(group))
                .ok_or_else(invalid)?;
            digits.clear();
        }

        // a trailing number without unit or an empty string
        if !digits.is_empty() || secs == 0 || secs > TimeDelta::MAX.num_seconds() {
            return Err(invalid());
        }

        Ok(Self {
            text: s.trim().to_string(),
            secs,
        })
    }
}

impl TryFrom<String> for KeepDuration {
    type Error = InvalidKeepDuration;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeepDuration> for String {
    fn from(value: KeepDuration) -> Self {
        value.text
    }
}

impl fmt::Display for KeepDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parses a backup directory name.
pub fn parse_timestamp(name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(name, TIMESTAMP_FORMAT).ok()
}

/// Deletes the backup directories in `backup_dir` that are older than
/// `now - keep`.
///
/// Only directories named by [TIMESTAMP_FORMAT] are considered, anything else
/// is left alone. On a dry run nothing is deleted. Returns the directories
/// that were (or would have been) deleted, oldest first.
pub fn prune(
    backup_dir: &Path,
    keep: &KeepDuration,
    now: NaiveDateTime,
    dry_run: bool,
) -> io::Result<Vec<PathBuf>> {
    let cutoff = now
        .checked_sub_signed(keep.as_delta())
        .unwrap_or(NaiveDateTime::MIN);
    log::debug!(target: "retention", "Pruning backups in {} older than {cutoff}", backup_dir.display());

    let mut expired = Vec::new();
    for entry in fs::read_dir(backup_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let Some(taken) = name.to_str().and_then(parse_timestamp) else {
            log::trace!(target: "retention", "Ignoring {}", entry.path().display());
            continue;
        };
        if taken < cutoff {
            expired.push((taken, entry.path()));
        }
    }
    expired.sort();

    let mut pruned = Vec::with_capacity(expired.len());
    for (_, path) in expired {
        if dry_run {
            log::info!(target: "retention", "Would remove expired backup {}", path.display());
        } else if let Err(e) = fs::remove_dir_all(&path) {
            log::warn!(target: "retention", "Unable to remove expired backup {}: {e}", path.display());
            continue;
        } else {
            log::info!(target: "retention", "Removed expired backup {}", path.display());
        }
        pruned.push(path);
    }

    Ok(pruned)
}
