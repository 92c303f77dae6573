//! Backend modules for performing individual backup tasks.
//!
//! The following backends are implemented:
//!
//! - [Database]: Per-schema dump of the MariaDB server, falling back to a
//!   recovery-mode server and finally to a cold copy of the data files.
//! - [Directory]: Plain zip of a directory tree, e.g. the whole installation
//!   or the web root.
//!
//! [Dump] and [ColdCopy] are the stages [Database] is built from.

pub mod cold_copy;
pub mod database;
pub mod directory;
pub mod dump;

pub use cold_copy::ColdCopy;
pub use database::Database;
pub use directory::Directory;
pub use dump::Dump;

use crate::mariadb::{InstallLayout, Schema};

/// Generic backup backend.
pub trait Backup {
    /// What a finished backup reports back.
    type Summary;
    /// Fatal error aborting the backup.
    type Error;

    /// Backups the data of the installation managed by the implementation.
    fn backup(&self, layout: &InstallLayout) -> Result<Self::Summary, Self::Error>;
}

/// Result of backing up a single schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub schema: Schema,
    /// Human readable reason of a failure, [None] on success.
    pub error: Option<String>,
}

impl SchemaOutcome {
    pub fn success(schema: Schema) -> Self {
        Self {
            schema,
            error: None,
        }
    }

    pub fn failure(schema: Schema, detail: impl Into<String>) -> Self {
        Self {
            schema,
            error: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
