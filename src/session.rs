//! Temporary state of one database backup run.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::TempDir;

use crate::archive::{self, ArchiveError, ArchiveStats};
use crate::mariadb::recovery::{RecoveryAttempt, RecoveryConfigFile, RecoveryServer};

/// Name of the session log inside the staging directory.
pub const LOG_FILE: &str = "backup.log";

const STAGING_PREFIX: &str = "xguard_db_";

/// Append-only log of a session, safe to share between workers.
#[derive(Debug)]
pub struct SessionLog {
    file: Mutex<File>,
}

impl SessionLog {
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends `line`. Failing to write is logged but not fatal.
    pub fn record(&self, line: &str) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{line}") {
            log::warn!(target: "session", "Writing to {LOG_FILE} failed: {e}");
        }
    }
}

/// Owns every temporary resource of a run: the staging directory, the
/// session log and possibly a recovery server with its config file.
///
/// Dropping the session stops the recovery server first, then removes the
/// recovery config and finally the staging directory. [finalize] does the
/// same after packing the staging directory.
///
/// [finalize]: BackupSession::finalize
#[derive(Debug)]
pub struct BackupSession {
    // field order is drop order
    recovery: Option<RecoveryServer>,
    recovery_config: Option<RecoveryConfigFile>,
    log: SessionLog,
    staging: TempDir,
    archive_path: PathBuf,
}

/// Result of [BackupSession::finalize].
#[derive(Debug)]
pub struct Finalized {
    pub archive: PathBuf,
    pub stats: ArchiveStats,
}

impl BackupSession {
    /// Creates a fresh staging directory with an empty session log.
    pub fn create(archive_path: PathBuf) -> io::Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()?;
        let session_log = SessionLog::create(&staging.path().join(LOG_FILE))?;
        log::debug!(target: "session", "Staging directory: {}", staging.path().display());

        Ok(Self {
            recovery: None,
            recovery_config: None,
            log: session_log,
            staging,
            archive_path,
        })
    }

    pub fn staging(&self) -> &Path {
        self.staging.path()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Takes ownership of the process and config file of a recovery attempt.
    ///
    /// Returns whether the recovery server accepted connections.
    pub fn adopt_recovery(&mut self, attempt: RecoveryAttempt) -> bool {
        let RecoveryAttempt {
            started,
            server,
            config,
        } = attempt;
        self.recovery = server;
        self.recovery_config = config;
        started
    }

    /// Stops the recovery server if one runs, removing its config.
    pub fn stop_recovery(&mut self) {
        if let Some(server) = self.recovery.take() {
            server.stop();
        }
        self.recovery_config = None;
    }

    /// Packs the staging directory into the archive and tears down the
    /// session.
    ///
    /// Temporary resources are released even if packing fails.
    pub fn finalize(mut self) -> Result<Finalized, ArchiveError> {
        self.stop_recovery();

        log::info!(target: "session", "Packing {}", self.archive_path.display());
        let packed = archive::zip_tree(self.staging.path(), &self.archive_path, |_| false);

        let Self {
            log: session_log,
            staging,
            archive_path,
            ..
        } = self;
        drop(session_log);
        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            log::warn!(
                target: "session",
                "Removing staging directory {} failed: {e}",
                staging_path.display()
            );
        }

        let stats = packed?;
        Ok(Finalized {
            archive: archive_path,
            stats,
        })
    }
}
