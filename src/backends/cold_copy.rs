//! Last resort backup copying the raw data files of each schema using
//! [ColdCopy].
//!
//! No server is involved. The copied files are only consistent if the server
//! was not writing to them at the time.

use std::ffi::OsString;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use super::SchemaOutcome;
use crate::mariadb::{Schema, SchemaFilter};
use crate::session::SessionLog;

/// Extensions of table data and metadata files worth copying.
pub const DATA_FILE_EXTENSIONS: [&str; 7] = ["frm", "ibd", "cfg", "par", "ibz", "myd", "myi"];

/// The data directory itself could not be listed.
#[derive(Debug, Display, Error)]
#[display("Reading data directory {} failed: {source}", data_dir.display())]
pub struct ColdCopyError {
    data_dir: PathBuf,
    source: io::Error,
}

/// Copies the data files of every schema directory below `data_dir`.
pub struct ColdCopy<'a> {
    data_dir: &'a Path,
    filter: &'a SchemaFilter,
}

impl<'a> ColdCopy<'a> {
    pub fn new(data_dir: &'a Path, filter: &'a SchemaFilter) -> Self {
        Self { data_dir, filter }
    }

    /// Schemas as found on disk: every accepted top level directory, sorted.
    ///
    /// Directories whose name is not valid UTF-8 are left out, see
    /// [ColdCopy::copy_all] for how they are reported.
    pub fn schemas(&self) -> Result<Vec<Schema>, ColdCopyError> {
        self.scan().map(|(schemas, _)| schemas)
    }

    /// Accepted schema directories and the names that are not valid UTF-8.
    fn scan(&self) -> Result<(Vec<Schema>, Vec<OsString>), ColdCopyError> {
        let entries = fs::read_dir(self.data_dir).map_err(|source| ColdCopyError {
            data_dir: self.data_dir.to_path_buf(),
            source,
        })?;

        let mut schemas = Vec::new();
        let mut undecodable = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(target: "backend::cold_copy", "Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if self.filter.accepts(&name) => schemas.push(Schema::new(name)),
                Ok(_) => {}
                Err(raw) => undecodable.push(raw),
            }
        }
        schemas.sort();
        undecodable.sort();

        Ok((schemas, undecodable))
    }

    /// Copies each schema into `<staging>/<schema>/`.
    ///
    /// Returns one outcome per schema. A schema failing to copy does not
    /// stop the others. A directory whose name is not valid UTF-8 is not
    /// copied and yields a failure under its lossily decoded name.
    pub fn copy_all(
        &self,
        staging: &Path,
        session_log: &SessionLog,
    ) -> Result<Vec<SchemaOutcome>, ColdCopyError> {
        let (schemas, undecodable) = self.scan()?;
        log::info!(target: "backend::cold_copy", "Cold copying {} schema(s)", schemas.len());

        let mut outcomes: Vec<SchemaOutcome> = schemas
            .into_iter()
            .map(|schema| match self.copy_schema(&schema, staging) {
                Ok(copied) => {
                    log::info!(target: "backend::cold_copy", "Copied {copied} file(s) of {schema}");
                    session_log.record(&format!("OK (cold): {schema}"));
                    SchemaOutcome::success(schema)
                }
                Err(e) => {
                    log::error!(target: "backend::cold_copy", "Cold copy of {schema} failed: {e}");
                    session_log.record(&format!("FAIL (cold): {schema}: {e}"));
                    SchemaOutcome::failure(schema, e.to_string())
                }
            })
            .collect();

        for raw in undecodable {
            let schema = Schema::new(raw.to_string_lossy());
            let detail = "directory name is not valid UTF-8";
            log::warn!(target: "backend::cold_copy", "Not copying {schema}: {detail}");
            session_log.record(&format!("FAIL (cold): {schema}: {detail}"));
            outcomes.push(SchemaOutcome::failure(schema, detail));
        }

        Ok(outcomes)
    }

    fn copy_schema(&self, schema: &Schema, staging: &Path) -> io::Result<usize> {
        let src = self.data_dir.join(schema.name());
        let dst = staging.join(schema.name());
        fs::create_dir_all(&dst)?;

        let mut copied = 0;
        for entry in fs::read_dir(&src)? {
            let path = entry?.path();
            if path.is_file() && is_data_file(&path) {
                if let Some(name) = path.file_name() {
                    copy_preserving_times(&path, &dst.join(name))?;
                    copied += 1;
                }
            }
        }

        Ok(copied)
    }
}

fn is_data_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DATA_FILE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Copies content and permissions, then carries over the file times.
fn copy_preserving_times(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;

    let meta = fs::metadata(src)?;
    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    File::options().write(true).open(dst)?.set_times(times)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    struct Fixture {
        data: tempfile::TempDir,
        staging: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                data: tempfile::tempdir().expect("tempdir"),
                staging: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn file(&self, rel: &str, contents: &str) {
            let path = self.data.path().join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, contents).expect("write");
        }

        fn log(&self) -> SessionLog {
            SessionLog::create(&self.staging.path().join("backup.log")).expect("log")
        }
    }

    #[test]
    fn copies_data_files_of_user_schemas_only() {
        let fx = Fixture::new();
        fx.file("shop/orders.frm", "frm");
        fx.file("shop/orders.ibd", "ibd");
        fx.file("shop/LEGACY.MYD", "myd");
        fx.file("shop/db.opt", "opt");
        fx.file("shop/notes.txt", "txt");
        fx.file("mysql/user.frm", "frm");
        fx.file("performance_schema/db.opt", "opt");
        fx.file("ibdata1", "shared tablespace");

        let filter = SchemaFilter::default();
        let cold = ColdCopy::new(fx.data.path(), &filter);
        let outcomes = cold.copy_all(fx.staging.path(), &fx.log()).expect("copy");

        assert_eq!(outcomes, vec![SchemaOutcome::success(Schema::new("shop"))]);
        let shop = fx.staging.path().join("shop");
        assert!(shop.join("orders.frm").is_file());
        assert!(shop.join("orders.ibd").is_file());
        assert!(shop.join("LEGACY.MYD").is_file());
        assert!(!shop.join("db.opt").exists());
        assert!(!shop.join("notes.txt").exists());
        assert!(!fx.staging.path().join("mysql").exists());
        assert!(!fx.staging.path().join("performance_schema").exists());

        let log = fs::read_to_string(fx.staging.path().join("backup.log")).expect("log");
        assert_eq!(log, "OK (cold): shop\n");
    }

    #[test]
    fn failing_schema_does_not_stop_others() {
        let fx = Fixture::new();
        fx.file("alpha/t.ibd", "a");
        fx.file("beta/t.ibd", "b");
        // a plain file where the schema directory should go
        fs::write(fx.staging.path().join("alpha"), "in the way").expect("write");

        let filter = SchemaFilter::default();
        let outcomes = ColdCopy::new(fx.data.path(), &filter)
            .copy_all(fx.staging.path(), &fx.log())
            .expect("copy");

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_success());
        assert_eq!(outcomes[0].schema, Schema::new("alpha"));
        assert_eq!(outcomes[1], SchemaOutcome::success(Schema::new("beta")));
        assert!(fx.staging.path().join("beta/t.ibd").is_file());
    }

    #[test]
    fn modification_time_is_preserved() {
        let fx = Fixture::new();
        fx.file("shop/t.ibd", "data");
        let src = fx.data.path().join("shop/t.ibd");
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&src)
            .and_then(|f| f.set_modified(stamp))
            .expect("set mtime");

        let filter = SchemaFilter::default();
        ColdCopy::new(fx.data.path(), &filter)
            .copy_all(fx.staging.path(), &fx.log())
            .expect("copy");

        let copied = fs::metadata(fx.staging.path().join("shop/t.ibd")).expect("meta");
        assert_eq!(copied.modified().expect("mtime"), stamp);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn undecodable_directory_name_is_reported() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = Fixture::new();
        fx.file("shop/t.ibd", "data");
        let odd = fx.data.path().join(OsStr::from_bytes(b"caf\xe9"));
        fs::create_dir(&odd).expect("mkdir");
        fs::write(odd.join("t.ibd"), "data").expect("write");

        let filter = SchemaFilter::default();
        let cold = ColdCopy::new(fx.data.path(), &filter);
        assert_eq!(cold.schemas().expect("schemas"), vec![Schema::new("shop")]);

        let outcomes = cold.copy_all(fx.staging.path(), &fx.log()).expect("copy");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0], SchemaOutcome::success(Schema::new("shop")));
        assert_eq!(
            outcomes[1],
            SchemaOutcome::failure(
                Schema::new("caf\u{fffd}"),
                "directory name is not valid UTF-8"
            )
        );

        let log = fs::read_to_string(fx.staging.path().join("backup.log")).expect("log");
        assert!(log.contains("FAIL (cold): caf\u{fffd}: directory name is not valid UTF-8"));
    }

    #[test]
    fn missing_data_dir_is_an_error() {
        let fx = Fixture::new();
        let filter = SchemaFilter::default();
        let missing = fx.data.path().join("nope");
        let res = ColdCopy::new(&missing, &filter).copy_all(fx.staging.path(), &fx.log());
        assert!(res.is_err());
    }
}
