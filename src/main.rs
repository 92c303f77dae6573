use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use xguard_lib::backends::{Backup, Database, Directory};
use xguard_lib::cli::{Action, Cli};
use xguard_lib::config::GuardConfig;
use xguard_lib::mariadb::InstallLayout;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    let config = match GuardConfig::load_or_init(&cli.config_path()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Reading the config file failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let layout = InstallLayout::new(cli.root.clone());
    let style = cli.color.style();
    let mut out = io::stdout().lock();

    let action = cli.action.unwrap_or_default();
    let printed = match action {
        Action::Database => {
            let database = Database::with_config(&config, cli.password.clone());
            match database.backup(&layout) {
                Ok(report) if cli.json => print_json(&mut out, &report),
                Ok(report) => report.render(&style, &mut out),
                Err(e) => {
                    log::error!(target: "backend::database", "Database backup failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        Action::Core | Action::Webroot => {
            let directory = if action == Action::Core {
                Directory::Core
            } else {
                Directory::WebRoot
            };
            match directory.backup(&layout) {
                Ok(summary) if cli.json => print_json(&mut out, &summary),
                Ok(summary) => summary.render(&style, &mut out),
                Err(e) => {
                    log::error!(target: "backend::directory", "Backup failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    if let Err(e) = printed {
        log::error!("Printing the summary failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_json(out: &mut impl Write, summary: &impl Serialize) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, summary).map_err(io::Error::other)?;
    writeln!(out)
}
