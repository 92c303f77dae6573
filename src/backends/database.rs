//! Resilient backup of all user schemas using [Database].
//!
//! The backup escalates through three stages until one of them reaches the
//! data:
//!
//! 1. Dump every schema from the running server.
//! 2. Start a temporary server in forced recovery mode and dump from it.
//! 3. Copy the raw data files of every schema.
//!
//! Whatever ends up in the staging directory is packed into one archive,
//! including partial results.

use std::io;
use std::path::PathBuf;

use chrono::Local;
use derive_more::{Display, Error, From};

use super::{Backup, ColdCopy, Dump, SchemaOutcome};
use crate::archive::ArchiveError;
use crate::backends::dump::DumpSettings;
use crate::config::GuardConfig;
use crate::mariadb::{
    self, recovery, InstallLayout, RecoverySettings, SchemaFilter, ServerTarget, Tools,
    ToolsConfig,
};
use crate::report::{BackupMode, Report};
use crate::session::BackupSession;
use crate::util::ident;

/// Archive category below `guard/backup/`.
const CATEGORY: &str = "database";

#[derive(Debug, Display, Error, From)]
/// Errors aborting a database backup as a whole.
pub enum DatabaseBackupError {
    /// The server's binary directory does not exist.
    #[display("Server binary directory not found: {}", _0.display())]
    MissingBinDir(#[error(ignore)] PathBuf),
    /// A tool required for every backup path is missing.
    #[display("Required tool not found: {}", _0.display())]
    MissingTool(#[error(ignore)] PathBuf),
    /// The staging directory or its log could not be created.
    #[display("Creating the staging directory failed: {_0}")]
    Staging(io::Error),
    /// The staging directory could not be packed.
    #[from]
    #[display("Building the archive failed: {_0}")]
    Archive(ArchiveError),
}

/// Backup of every user schema of the local server.
#[derive(Debug, Clone)]
pub struct Database {
    target: ServerTarget,
    tools: ToolsConfig,
    filter: SchemaFilter,
    dump: DumpSettings,
    recovery: RecoverySettings,
}

struct Collected {
    mode: BackupMode,
    outcomes: Vec<SchemaOutcome>,
    warnings: Vec<String>,
}

impl Database {
    /// Creates the backend from the config, `secret` being the password of
    /// the configured server user.
    pub fn with_config(config: &GuardConfig, secret: Option<String>) -> Self {
        let target = ServerTarget {
            secret,
            ..config.server.clone()
        };

        Self {
            target,
            tools: config.tools.clone(),
            filter: SchemaFilter::new(config.schemas.exclude.iter().cloned()),
            dump: config.dump.clone(),
            recovery: config.recovery.clone(),
        }
    }

    fn check_prerequisites(
        layout: &InstallLayout,
        tools: &Tools,
    ) -> Result<(), DatabaseBackupError> {
        let bin_dir = layout.bin_dir();
        if !bin_dir.is_dir() {
            return Err(DatabaseBackupError::MissingBinDir(bin_dir));
        }
        for tool in [&tools.client, &tools.dump] {
            if !tool.is_file() {
                return Err(DatabaseBackupError::MissingTool(tool.clone()));
            }
        }
        if !tools.server.is_file() {
            log::warn!(
                target: "backend::database",
                "Server binary {} not found, recovery mode is unavailable",
                tools.server.display()
            );
        }

        Ok(())
    }

    fn collect(
        &self,
        layout: &InstallLayout,
        tools: &Tools,
        session: &mut BackupSession,
    ) -> Collected {
        let mut warnings = Vec::new();

        let (mode, schemas) = match mariadb::probe(&tools.client, &self.target, &self.filter) {
            Ok(schemas) => (BackupMode::Live, schemas),
            Err(e) => {
                log::warn!(target: "backend::database", "Could not connect: {e}");
                session.log().record(&format!("Connection failed: {e}"));

                log::info!(target: "backend::database", "Starting temporary recovery server");
                let attempt = recovery::start(&tools.server, layout, &self.target, &self.recovery);
                if !session.adopt_recovery(attempt) {
                    log::warn!(
                        target: "backend::database",
                        "Recovery failed, falling back to cold copy"
                    );
                    session
                        .log()
                        .record("Recovery server did not start, falling back to cold copy");
                    // cold copy runs without any server process
                    session.stop_recovery();
                    return self.cold_copy(layout, session);
                }
                session.log().record("Recovery server started");

                match mariadb::probe(&tools.client, &self.target, &self.filter) {
                    Ok(schemas) => (BackupMode::Recovered, schemas),
                    Err(e) => {
                        log::error!(
                            target: "backend::database",
                            "Recovery server is up but listing schemas failed: {e}"
                        );
                        session
                            .log()
                            .record(&format!("Listing schemas on recovery server failed: {e}"));
                        warnings.push(format!(
                            "recovery server accepted connections but listing schemas failed: {e}"
                        ));
                        (BackupMode::Recovered, Vec::new())
                    }
                }
            }
        };

        if schemas.is_empty() && warnings.is_empty() {
            log::warn!(target: "backend::database", "No user schemas found");
            warnings.push("no user schemas found".into());
        }

        let outcomes = Dump::new(&tools.dump, &self.target, &self.dump).dump_all(
            &schemas,
            session.staging(),
            session.log(),
        );

        Collected {
            mode,
            outcomes,
            warnings,
        }
    }

    fn cold_copy(&self, layout: &InstallLayout, session: &BackupSession) -> Collected {
        let data_dir = layout.data_dir();
        let copied =
            ColdCopy::new(&data_dir, &self.filter).copy_all(session.staging(), session.log());

        let (outcomes, warnings) = match copied {
            Ok(outcomes) if outcomes.is_empty() => {
                log::warn!(target: "backend::database", "No user schemas found");
                (outcomes, vec!["no user schemas found".to_string()])
            }
            Ok(outcomes) => (outcomes, Vec::new()),
            Err(e) => {
                log::error!(target: "backend::database", "{e}");
                session.log().record(&format!("Cold copy failed: {e}"));
                (Vec::new(), vec![e.to_string()])
            }
        };

        Collected {
            mode: BackupMode::ColdCopy,
            outcomes,
            warnings,
        }
    }
}

impl Backup for Database {
    type Summary = Report;
    type Error = DatabaseBackupError;

    fn backup(&self, layout: &InstallLayout) -> Result<Self::Summary, Self::Error> {
        let tools = self.tools.resolve(layout);
        Self::check_prerequisites(layout, &tools)?;

        let archive_path = layout.archive_path(CATEGORY, Local::now(), &ident::archive_id());
        let mut session =
            BackupSession::create(archive_path).map_err(DatabaseBackupError::Staging)?;
        log::info!(
            target: "backend::database",
            "Backing up databases to {}",
            session.archive_path().display()
        );

        let Collected {
            mode,
            outcomes,
            mut warnings,
        } = self.collect(layout, &tools, &mut session);

        let finalized = session.finalize()?;
        warnings.extend(
            finalized
                .stats
                .skipped
                .iter()
                .map(|path| format!("not archived: {}", path.display())),
        );
        log::info!(target: "backend::database", "Finished database backup ({mode})");

        Ok(Report::new(mode, outcomes, finalized.archive, warnings))
    }
}
