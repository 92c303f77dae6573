use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use crate::report::Style;

#[cfg(windows)]
const DEFAULT_ROOT: &str = "C:/xampp";
#[cfg(not(windows))]
const DEFAULT_ROOT: &str = "/opt/lampp";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Root directory of the XAMPP installation.
    #[arg(long, short = 'r', env = "XGUARD_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Config file. Defaults to `<root>/guard/xguard.toml`.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Password of the database user.
    #[arg(long, env = "XGUARD_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// When to color the summary.
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub action: Option<Action>,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.root.join("guard").join("xguard.toml"))
    }
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Backup every user database into one zip. (Default)
    #[default]
    Database,
    /// Zip the whole installation, excluding previous backups.
    Core,
    /// Zip the web root (htdocs).
    Webroot,
}

#[derive(ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    /// Color if stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    pub fn style(self) -> Style {
        let color = match self {
            ColorChoice::Auto => std::io::stdout().is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };
        Style::new(color)
    }
}
