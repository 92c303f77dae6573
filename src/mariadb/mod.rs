//! The local MariaDB/MySQL installation and how to talk to it.

pub mod client;
pub mod recovery;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Datelike;

pub use client::{probe, ProbeError};
pub use recovery::{RecoveryAttempt, RecoveryServer, RecoverySettings};

/// Schemas maintained by the server itself. They are never backed up.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

/// The server to probe and export from.
///
/// The secret is never written to the config file nor to any log.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ServerTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip)]
    pub secret: Option<String>,
}

impl Default for ServerTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3306,
            user: "root".into(),
            secret: None,
        }
    }
}

impl fmt::Debug for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ServerTarget {
    /// Connection flags shared by the client and the export tool.
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            self.host.clone(),
            "-P".to_string(),
            self.port.to_string(),
            "-u".to_string(),
            self.user.clone(),
        ];
        if let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty()) {
            args.push(format!("-p{secret}"));
        }
        args
    }
}

/// A user created database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Schema(String);

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decides which enumerated schema names are backed up.
///
/// The [SYSTEM_SCHEMAS] are always excluded.
#[derive(Debug, Clone)]
pub struct SchemaFilter {
    excluded: BTreeSet<String>,
}

impl Default for SchemaFilter {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl SchemaFilter {
    /// Excludes `extra` names in addition to the system schemas.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded = SYSTEM_SCHEMAS
            .iter()
            .map(|s| s.to_string())
            .chain(extra.into_iter().map(Into::into))
            .collect();
        Self { excluded }
    }

    pub fn accepts(&self, name: &str) -> bool {
        !name.is_empty() && !self.excluded.contains(name)
    }
}

/// Binary names (or absolute paths) of the server tools.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Command line client used to list schemas.
    pub client: String,
    /// Export tool producing one `.sql` file per schema.
    pub dump: String,
    /// Server binary started in recovery mode.
    pub server: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let exe = |name: &str| format!("{name}{}", std::env::consts::EXE_SUFFIX);
        Self {
            client: exe("mysql"),
            dump: exe("mysqldump"),
            server: exe("mysqld"),
        }
    }
}

impl ToolsConfig {
    /// Resolves the configured names against the layout's binary directory.
    pub fn resolve(&self, layout: &InstallLayout) -> Tools {
        let bin_dir = layout.bin_dir();
        Tools {
            client: bin_dir.join(&self.client),
            dump: bin_dir.join(&self.dump),
            server: bin_dir.join(&self.server),
        }
    }
}

/// Resolved paths of the server tools.
#[derive(Debug, Clone)]
pub struct Tools {
    pub client: PathBuf,
    pub dump: PathBuf,
    pub server: PathBuf,
}

/// Directory layout of an XAMPP style installation.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if root.is_relative() {
            log::warn!(target: "mariadb", "install root is relative: {}", root.display());
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base directory of the server installation.
    pub fn server_base(&self) -> PathBuf {
        self.root.join("mysql")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.server_base().join("bin")
    }

    /// On-disk data directory, one subdirectory per schema.
    pub fn data_dir(&self) -> PathBuf {
        self.server_base().join("data")
    }

    pub fn socket(&self) -> PathBuf {
        self.server_base().join("mysql.sock")
    }

    pub fn htdocs(&self) -> PathBuf {
        self.root.join("htdocs")
    }

    /// Root of every archive this tool writes.
    pub fn backup_root(&self) -> PathBuf {
        self.root.join("guard").join("backup")
    }

    /// `<root>/guard/backup/<category>/<YYYY>/<MM>/<DD>/<id>.zip`
    pub fn archive_path(&self, category: &str, date: impl Datelike, id: &str) -> PathBuf {
        self.backup_root()
            .join(category)
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(format!("{id}.zip"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn filter_rejects_system_and_extra_schemas() {
        let filter = SchemaFilter::new(["scratch"]);
        for system in SYSTEM_SCHEMAS {
            assert!(!filter.accepts(system));
        }
        assert!(!filter.accepts("scratch"));
        assert!(!filter.accepts(""));
        assert!(filter.accepts("shop"));
        assert!(filter.accepts("MySQL"));
    }

    #[test]
    fn secret_is_passed_attached_and_never_debug_printed() {
        let mut target = ServerTarget::default();
        assert_eq!(
            target.connection_args(),
            ["-h", "127.0.0.1", "-P", "3306", "-u", "root"]
        );

        target.secret = Some("hunter2".into());
        assert_eq!(target.connection_args().last().map(String::as_str), Some("-phunter2"));
        assert!(!format!("{target:?}").contains("hunter2"));
    }

    #[test]
    fn archive_path_is_dated() {
        let layout = InstallLayout::new("/opt/lampp");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).expect("valid date");
        assert_eq!(
            layout.archive_path("database", date, "abc1"),
            PathBuf::from("/opt/lampp/guard/backup/database/2024/03/07/abc1.zip")
        );
    }
}
