use std::path::Path;

use derive_more::{Display, Error, From};

use super::{Schema, SchemaFilter, ServerTarget};
use crate::util::process::{self, RunError};

#[derive(Debug, Display, Error, From)]
/// The server could not be asked for its schemas.
pub enum ProbeError {
    /// The client binary could not be run.
    #[from]
    Launch(RunError),
    /// The client ran but reported a failure, e.g. server down or access denied.
    #[display("{_0}")]
    Rejected(#[error(ignore)] String),
}

/// Asks the server behind `target` for its schemas using the command line
/// `client`.
///
/// Only names accepted by `filter` are returned.
pub fn probe(
    client: &Path,
    target: &ServerTarget,
    filter: &SchemaFilter,
) -> Result<Vec<Schema>, ProbeError> {
    log::debug!(target: "mariadb::client", "Listing schemas on {}:{}", target.host, target.port);

    let mut args = target.connection_args();
    args.extend(["-N", "-e", "SHOW DATABASES"].map(String::from));

    let output = process::run(client, &args, None)?;
    if !output.success() {
        return Err(ProbeError::Rejected(output.error_detail()));
    }

    let schemas = parse_schema_list(&output.stdout, filter);
    log::debug!(target: "mariadb::client", "Found {} user schema(s)", schemas.len());
    Ok(schemas)
}

/// One schema name per non-empty line.
fn parse_schema_list(stdout: &str, filter: &SchemaFilter) -> Vec<Schema> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|name| filter.accepts(name))
        .map(Schema::new)
        .collect()
}
