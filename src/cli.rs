use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ez3d",
    version,
    about = "Fetch 3D-print submissions into per-user folders and look them up",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $EZ3D_CONFIG                (environment variable, may come from .env)
  3. ./EZ3D.properties
  4. <home>/EZ3D/EZ3D.properties

A missing file means every setting takes its default."
)]
pub(crate) struct Cli {
    /// Path to the properties file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print summaries as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Clone, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Run the background refresh and the interactive lookup (default)
    Run,

    /// Run only the background refresh until interrupted
    Daemon,

    /// Fetch new submissions once
    Sync,

    /// Remove files past the retention period once
    Sweep,

    /// List every user folder
    Users,

    /// Show the latest files of the one user matching QUERY
    Search {
        /// Part of a name or email
        query: String,
    },

    /// Open the documentation in a browser
    Docs,
}

impl Commands {
    /// Long-running commands log at info by default.
    pub fn is_service(&self) -> bool {
        matches!(self, Commands::Run | Commands::Daemon)
    }
}
