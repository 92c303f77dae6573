//! Final summary of a backup run, rendered for humans or as JSON.

use std::io::{self, Write};
use std::path::PathBuf;

use derive_more::Display;

use crate::backends::SchemaOutcome;
use crate::mariadb::Schema;

/// Explicit rendering configuration, passed to everything that prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Style {
    pub color: bool,
}

/// Semantic colors of the terminal output.
#[derive(Debug, Clone, Copy)]
pub enum Tone {
    Ok,
    Warn,
    Error,
    Accent,
    Dim,
}

impl Tone {
    fn ansi(self) -> &'static str {
        match self {
            Tone::Ok => "38;5;40",
            Tone::Warn => "38;5;214",
            Tone::Error => "38;5;196",
            Tone::Accent => "38;5;208",
            Tone::Dim => "2",
        }
    }
}

impl Style {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn paint(&self, text: &str, tone: Tone) -> String {
        if self.color {
            format!("\x1b[{}m{text}\x1b[0m", tone.ansi())
        } else {
            text.to_string()
        }
    }

    /// Writes an aligned `key value` line.
    pub fn key_value(
        &self,
        out: &mut impl Write,
        key: &str,
        value: &str,
        tone: Tone,
    ) -> io::Result<()> {
        writeln!(
            out,
            "{} {}",
            self.paint(&format!("{key:<14}"), Tone::Dim),
            self.paint(value, tone)
        )
    }
}

/// Which path produced the database backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupMode {
    /// Exported from the regularly running server.
    #[display("live")]
    Live,
    /// Exported from a server started in forced recovery mode.
    #[display("recovered")]
    Recovered,
    /// Data files copied without any server.
    #[display("cold copy")]
    ColdCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Failure {
    pub schema: Schema,
    pub error: String,
}

/// Outcome of a database backup run.
///
/// `successes` and `failures` partition the schemas that were attempted,
/// both sorted by name independent of completion order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Report {
    pub mode: BackupMode,
    pub successes: Vec<Schema>,
    pub failures: Vec<Failure>,
    pub archive: PathBuf,
    /// Problems not tied to a single schema.
    pub warnings: Vec<String>,
}

impl Report {
    pub fn new(
        mode: BackupMode,
        outcomes: Vec<SchemaOutcome>,
        archive: PathBuf,
        warnings: Vec<String>,
    ) -> Self {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for SchemaOutcome { schema, error } in outcomes {
            match error {
                None => successes.push(schema),
                Some(error) => failures.push(Failure { schema, error }),
            }
        }
        successes.sort();
        failures.sort_by(|a, b| a.schema.cmp(&b.schema));

        Self {
            mode,
            successes,
            failures,
            archive,
            warnings,
        }
    }

    pub fn render(&self, style: &Style, out: &mut impl Write) -> io::Result<()> {
        style.key_value(out, "Mode", &self.mode.to_string(), Tone::Accent)?;
        style.key_value(out, "Success", &self.successes.len().to_string(), Tone::Ok)?;
        style.key_value(out, "Errors", &self.failures.len().to_string(), Tone::Error)?;

        if !self.successes.is_empty() {
            writeln!(out, "\n{}", style.paint("Success:", Tone::Ok))?;
            for schema in &self.successes {
                writeln!(out, "  • {schema}")?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(out, "\n{}", style.paint("Errors:", Tone::Error))?;
            for Failure { schema, error } in &self.failures {
                writeln!(out, "  • {schema}: {error}")?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(out, "\n{}", style.paint("Warnings:", Tone::Warn))?;
            for warning in &self.warnings {
                writeln!(out, "  • {warning}")?;
            }
        }

        writeln!(out)?;
        style.key_value(out, "Zip Output", &self.archive.display().to_string(), Tone::Accent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report::new(
            BackupMode::Live,
            vec![
                SchemaOutcome::success(Schema::new("shop")),
                SchemaOutcome::failure(Schema::new("_empty"), "empty output"),
                SchemaOutcome::success(Schema::new("blog")),
            ],
            PathBuf::from("/x/a.zip"),
            Vec::new(),
        )
    }

    #[test]
    fn outcomes_are_partitioned_and_sorted() {
        let report = sample();
        assert_eq!(report.successes, vec![Schema::new("blog"), Schema::new("shop")]);
        assert_eq!(
            report.failures,
            vec![Failure {
                schema: Schema::new("_empty"),
                error: "empty output".into()
            }]
        );
    }

    #[test]
    fn plain_rendering_lists_everything() {
        let mut out = Vec::new();
        sample().render(&Style::new(false), &mut out).expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Success        2\n"));
        assert!(text.contains("Errors         1\n"));
        assert!(text.contains("  • blog\n  • shop\n"));
        assert!(text.contains("  • _empty: empty output\n"));
        assert!(text.contains("/x/a.zip"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn colored_rendering_uses_ansi() {
        let mut out = Vec::new();
        sample().render(&Style::new(true), &mut out).expect("render");
        assert!(String::from_utf8_lossy(&out).contains("\x1b[38;5;40m"));
    }

    #[test]
    fn json_uses_kebab_case_mode() {
        let mut report = sample();
        report.mode = BackupMode::ColdCopy;
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["mode"], "cold-copy");
        assert_eq!(json["successes"][0], "blog");
        assert_eq!(json["failures"][0]["error"], "empty output");
    }
}
