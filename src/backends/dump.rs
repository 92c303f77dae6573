//! Concurrent export of every schema into its own `.sql` file using [Dump].

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use super::SchemaOutcome;
use crate::mariadb::{Schema, ServerTarget};
use crate::session::SessionLog;
use crate::util::pool;
use crate::util::process::{self, first_non_blank, Output};

/// Limits of the export stage.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DumpSettings {
    /// Upper bound of concurrently running exports.
    ///
    /// Never above [pool::MAX_WORKERS], further capped by the available
    /// parallelism and the number of schemas.
    pub max_workers: usize,
    /// Kill an export running longer than this. No limit if unset.
    pub timeout_secs: Option<u64>,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            max_workers: pool::MAX_WORKERS,
            timeout_secs: None,
        }
    }
}

/// Exports schemas of a server with the dump tool, one process per schema.
pub struct Dump<'a> {
    tool: &'a Path,
    target: &'a ServerTarget,
    settings: &'a DumpSettings,
}

impl<'a> Dump<'a> {
    pub fn new(tool: &'a Path, target: &'a ServerTarget, settings: &'a DumpSettings) -> Self {
        Self {
            tool,
            target,
            settings,
        }
    }

    /// Exports every schema into `<staging>/<schema>.sql`.
    ///
    /// Returns exactly one outcome per schema, in completion order. A failing
    /// export leaves no file behind and does not affect the others.
    pub fn dump_all(
        &self,
        schemas: &[Schema],
        staging: &Path,
        session_log: &SessionLog,
    ) -> Vec<SchemaOutcome> {
        let workers = pool::worker_count(self.settings.max_workers, schemas.len());
        log::info!(
            target: "backend::dump",
            "Dumping {} schema(s) with {workers} worker(s)",
            schemas.len()
        );

        pool::run_bounded(schemas, workers, |schema| {
            let outcome = self.dump_one(schema, staging);
            match &outcome.error {
                None => {
                    log::info!(target: "backend::dump", "Dumped {schema}");
                    session_log.record(&format!("OK: {schema}"));
                }
                Some(detail) => {
                    log::error!(target: "backend::dump", "Dump of {schema} failed: {detail}");
                    session_log.record(&format!("FAIL: {schema}: {detail}"));
                }
            }
            outcome
        })
    }

    fn dump_one(&self, schema: &Schema, staging: &Path) -> SchemaOutcome {
        let result_file = staging.join(dump_file_name(schema));
        let args = self.args(schema, &result_file);
        let timeout = self.settings.timeout_secs.map(Duration::from_secs);

        let verdict = match process::run(self.tool, &args, timeout) {
            Ok(output) => judge(&output, &result_file),
            Err(e) => Err(e.to_string()),
        };

        match verdict {
            Ok(()) => SchemaOutcome::success(schema.clone()),
            Err(detail) => {
                discard(&result_file);
                SchemaOutcome::failure(schema.clone(), detail)
            }
        }
    }

    fn args(&self, schema: &Schema, result_file: &Path) -> Vec<String> {
        let mut args = self.target.connection_args();
        args.push(schema.name().to_string());
        args.extend(
            [
                "--routines",
                "--events",
                "--triggers",
                "--single-transaction",
                "--skip-lock-tables",
                "--default-character-set=utf8mb4",
            ]
            .map(String::from),
        );
        args.push(format!("--result-file={}", result_file.display()));
        args
    }
}

/// File name of a schema's export, `<schema>.sql`.
///
/// Path separators are encoded the way the server names schema directories
/// on disk, `/` as `@002f` and `\` as `@005c`.
fn dump_file_name(schema: &Schema) -> String {
    let mut name = String::with_capacity(schema.name().len() + 4);
    for c in schema.name().chars() {
        match c {
            '/' => name.push_str("@002f"),
            '\\' => name.push_str("@005c"),
            c => name.push(c),
        }
    }
    name.push_str(".sql");
    name
}

/// An export succeeded iff it exited 0 and left a non-empty result file.
fn judge(output: &Output, result_file: &Path) -> Result<(), String> {
    if !output.success() {
        return Err(output.error_detail());
    }

    let fallback = match fs::metadata(result_file) {
        Ok(meta) if meta.len() > 0 => return Ok(()),
        Ok(_) => "empty output",
        Err(_) => "no output file",
    };
    Err(first_non_blank(&[output.stderr.as_str(), output.stdout.as_str()])
        .unwrap_or_else(|| fallback.to_string()))
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(target: "backend::dump", "Removing {} failed: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use crate::util::process::Exit;

    use super::*;

    fn output(exit: Exit, stderr: &str) -> Output {
        Output {
            exit,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn args_follow_connection_flags() {
        let target = ServerTarget {
            secret: Some("pw".into()),
            ..Default::default()
        };
        let settings = DumpSettings::default();
        let dump = Dump::new(Path::new("mysqldump"), &target, &settings);

        let args = dump.args(&Schema::new("shop"), Path::new("/tmp/s/shop.sql"));
        assert_eq!(
            args,
            [
                "-h",
                "127.0.0.1",
                "-P",
                "3306",
                "-u",
                "root",
                "-ppw",
                "shop",
                "--routines",
                "--events",
                "--triggers",
                "--single-transaction",
                "--skip-lock-tables",
                "--default-character-set=utf8mb4",
                "--result-file=/tmp/s/shop.sql",
            ]
        );
    }

    #[test]
    fn separators_in_schema_names_stay_in_one_file_name() {
        assert_eq!(dump_file_name(&Schema::new("shop")), "shop.sql");
        assert_eq!(dump_file_name(&Schema::new("shop/2019")), "shop@002f2019.sql");
        assert_eq!(dump_file_name(&Schema::new("a\\b")), "a@005cb.sql");
    }

    #[test]
    fn judge_requires_zero_exit_and_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let full = dir.path().join("full.sql");
        let empty = dir.path().join("empty.sql");
        fs::write(&full, "CREATE TABLE t (id INT);").expect("write");
        fs::write(&empty, "").expect("write");

        assert_eq!(judge(&output(Exit::Code(0), ""), &full), Ok(()));
        assert_eq!(
            judge(&output(Exit::Code(2), "Access denied"), &full),
            Err("Access denied".into())
        );
        assert_eq!(judge(&output(Exit::Code(2), ""), &full), Err("exit 2".into()));
        assert_eq!(
            judge(&output(Exit::Code(0), ""), &empty),
            Err("empty output".into())
        );
        assert_eq!(
            judge(&output(Exit::Code(0), ""), &dir.path().join("missing.sql")),
            Err("no output file".into())
        );
    }
}
