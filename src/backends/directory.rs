//! Plain zip backups of directory trees using [Directory].

use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Local;
use derive_more::{Display, Error, From};

use super::Backup;
use crate::archive::{self, ArchiveError};
use crate::mariadb::InstallLayout;
use crate::report::{Style, Tone};
use crate::util::ident;

#[derive(Debug, Display, Error, From)]
/// Errors of a [Directory] backup.
pub enum DirectoryBackupError {
    /// The directory to back up does not exist.
    #[display("Directory not found: {}", _0.display())]
    SourceNotFound(#[error(ignore)] PathBuf),
    #[from]
    Archive(ArchiveError),
}

/// Which part of the installation is zipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directory {
    /// The whole installation root, without previous backups.
    Core,
    /// The web root (`htdocs`).
    WebRoot,
}

/// Result of a [Directory] backup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectorySummary {
    pub source: PathBuf,
    pub archive: PathBuf,
    pub files: usize,
    pub skipped: Vec<PathBuf>,
}

impl DirectorySummary {
    pub fn render(&self, style: &Style, out: &mut impl Write) -> io::Result<()> {
        style.key_value(out, "Source", &self.source.display().to_string(), Tone::Dim)?;
        style.key_value(out, "Files", &self.files.to_string(), Tone::Ok)?;
        if !self.skipped.is_empty() {
            style.key_value(out, "Skipped", &self.skipped.len().to_string(), Tone::Warn)?;
            for path in &self.skipped {
                writeln!(out, "  • {}", path.display())?;
            }
        }
        style.key_value(out, "Zip Output", &self.archive.display().to_string(), Tone::Accent)
    }
}

impl Directory {
    fn category(self) -> &'static str {
        match self {
            Directory::Core => "core",
            Directory::WebRoot => "htdocs",
        }
    }

    fn source(self, layout: &InstallLayout) -> PathBuf {
        match self {
            Directory::Core => layout.root().to_path_buf(),
            Directory::WebRoot => layout.htdocs(),
        }
    }
}

impl Backup for Directory {
    type Summary = DirectorySummary;
    type Error = DirectoryBackupError;

    fn backup(&self, layout: &InstallLayout) -> Result<Self::Summary, Self::Error> {
        let source = self.source(layout);
        if !source.is_dir() {
            return Err(DirectoryBackupError::SourceNotFound(source));
        }

        let archive = layout.archive_path(self.category(), Local::now(), &ident::archive_id());
        log::info!(
            target: "backend::directory",
            "Zipping {} into {}",
            source.display(),
            archive.display()
        );

        // never pack previous backups, including the archive being written
        let backups = layout.backup_root();
        let stats = archive::zip_tree(&source, &archive, |path| path.starts_with(&backups))?;
        for path in &stats.skipped {
            log::warn!(target: "backend::directory", "Not archived: {}", path.display());
        }
        log::info!(target: "backend::directory", "Finished backup of {} files", stats.files);

        Ok(DirectorySummary {
            source,
            archive,
            files: stats.files,
            skipped: stats.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use zip::ZipArchive;

    use super::*;

    #[test]
    fn core_backup_skips_previous_backups() {
        let root = tempfile::tempdir().expect("tempdir");
        let layout = InstallLayout::new(root.path());
        fs::create_dir_all(root.path().join("apache/conf")).expect("mkdir");
        fs::write(root.path().join("apache/conf/httpd.conf"), "Listen 80").expect("write");
        fs::create_dir_all(layout.backup_root().join("core")).expect("mkdir");
        fs::write(layout.backup_root().join("core/old.zip"), "old").expect("write");

        let summary = Directory::Core.backup(&layout).expect("backup");
        assert_eq!(summary.files, 1);
        assert!(summary.archive.starts_with(layout.backup_root().join("core")));

        let zip = ZipArchive::new(File::open(&summary.archive).expect("open")).expect("zip");
        let names: Vec<&str> = zip.file_names().collect();
        assert!(names.contains(&"apache/conf/httpd.conf"));
        assert!(names.iter().all(|name| !name.starts_with("guard/backup/")));
    }

    #[test]
    fn missing_web_root_is_reported() {
        let root = tempfile::tempdir().expect("tempdir");
        let layout = InstallLayout::new(root.path());

        let res = Directory::WebRoot.backup(&layout);
        assert!(matches!(res, Err(DirectoryBackupError::SourceNotFound(_))));
        assert!(!layout.backup_root().exists());
    }
}
