//! Zip packaging of directory trees.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const COMPRESSION_LEVEL: i64 = 6;

#[derive(Debug, Display, Error, From)]
/// Errors while writing an archive.
pub enum ArchiveError {
    /// Creating the archive file or copying data into it failed.
    #[display("Writing archive failed: {_0}")]
    Io(io::Error),
    /// The zip container could not be written.
    #[display("Zip error: {_0}")]
    Zip(ZipError),
}

/// What ended up in an archive.
#[derive(Debug, Default, Clone)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
    /// Entries that could not be read and are missing from the archive.
    pub skipped: Vec<PathBuf>,
}

/// Packs every file and directory below `src` into a new zip at `dest`.
///
/// Entry names are relative to `src` with `/` separators. Subtrees for which
/// `exclude` returns `true` are not descended into. `dest` must not exist;
/// its parent directories are created. A half written archive is removed.
pub fn zip_tree<F>(src: &Path, dest: &Path, exclude: F) -> Result<ArchiveStats, ArchiveError>
where
    F: Fn(&Path) -> bool,
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create_new(dest)?;

    let packed = write_tree(src, file, &exclude);
    match &packed {
        Ok(stats) => log::debug!(
            target: "archive",
            "Wrote {} ({} files, {} skipped)",
            dest.display(),
            stats.files,
            stats.skipped.len()
        ),
        Err(e) => {
            log::error!(target: "archive", "Packing {} failed: {e}", dest.display());
            if let Err(e) = fs::remove_file(dest) {
                log::warn!(target: "archive", "Removing partial archive failed: {e}");
            }
        }
    }

    packed
}

fn write_tree(
    src: &Path,
    file: File,
    exclude: &dyn Fn(&Path) -> bool,
) -> Result<ArchiveStats, ArchiveError> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));
    let mut stats = ArchiveStats::default();

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !exclude(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!(target: "archive", "Skipping unreadable entry: {e}");
                stats
                    .skipped
                    .push(e.path().map_or_else(|| src.to_path_buf(), Path::to_path_buf));
                continue;
            }
        };

        let name = entry_name(src, entry.path());
        let file_type = entry.file_type();
        if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            stats.directories += 1;
            continue;
        }
        if !file_type.is_file() {
            log::debug!(target: "archive", "Skipping special file {}", entry.path().display());
            continue;
        }

        let mut reader = match File::open(entry.path()) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!(target: "archive", "Skipping {}: {e}", entry.path().display());
                stats.skipped.push(entry.path().to_path_buf());
                continue;
            }
        };
        let large = entry
            .metadata()
            .is_ok_and(|meta| meta.len() >= u64::from(u32::MAX));

        zip.start_file(name, options.large_file(large))?;
        io::copy(&mut reader, &mut zip)?;
        stats.files += 1;
    }

    zip.finish()?;
    Ok(stats)
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
