use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod cli;
pub mod config;
pub mod console;
pub mod context;
pub mod drive;
pub mod error;
pub mod google;
pub mod library;
pub mod reconcile;
pub mod scheduler;
pub mod sheet;
pub mod sweep;
pub mod table;

use cli::{Cli, Commands};
use config::{Config, Settings};
use context::AppContext;
use error::{Ez3dError, Result};
use library::Lookup;

/// Boxed future returned by the remote service traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub fn run() {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Run);

    // Long-running commands default to info so cycles show up in the log
    let level = match cli.verbose {
        0 if command.is_service() => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(dispatch(&cli, command));
    // stdin reads sit on a blocking thread that never returns on its own
    runtime.shutdown_background();

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: &Cli, command: Commands) -> Result<()> {
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    let settings = Settings::from_config(&config)?;
    tracing::debug!(config = %config_path.display(), files = %settings.files_dir.display(), "settings loaded");

    match command {
        Commands::Users => {
            for user in library::user_folders(&settings.files_dir) {
                println!("{user}");
            }
        }
        Commands::Search { query } => print_lookup(&settings.files_dir, &query),
        Commands::Docs => {
            if let Err(e) = open::that(&settings.documentation_url) {
                tracing::warn!(error = %e, "failed to open browser");
            }
            println!("{}", settings.documentation_url);
        }
        Commands::Sweep => {
            let summary = sweep::sweep_tree(
                &settings.files_dir,
                settings.retention_millis(),
                std::time::SystemTime::now(),
            );
            report(cli.json, &summary, || {
                format!(
                    "removed {} file(s) and {} empty folder(s)",
                    summary.files_removed, summary.dirs_removed
                )
            })?;
        }
        Commands::Sync => {
            settings.spreadsheet_id()?;
            let ctx = connect(settings, true).await?;
            let summary = reconcile::reconcile(&ctx).await?;
            report(cli.json, &summary, || {
                format!(
                    "downloaded {} file(s); {} row(s) seen, {} already present, {} too old, {} skipped",
                    summary.files_downloaded,
                    summary.rows_seen,
                    summary.rows_present,
                    summary.rows_stale,
                    summary.rows_invalid + summary.rows_without_ids
                )
            })?;
        }
        Commands::Daemon => {
            let ctx = Arc::new(connect(settings, false).await?);
            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(scheduler::run(ctx, stop_rx));

            wait_for_ctrl_c().await?;
            tracing::info!("shutdown signal received, finishing current cycle");
            stop_tx.send(true).ok();
            join_scheduler(handle).await;
        }
        Commands::Run => {
            let ctx = Arc::new(connect(settings, false).await?);
            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(scheduler::run(ctx.clone(), stop_rx));

            let result = tokio::select! {
                r = console::run(ctx) => r,
                r = wait_for_ctrl_c() => r,
            };
            stop_tx.send(true).ok();
            join_scheduler(handle).await;
            result?;
        }
    }
    Ok(())
}

/// Build the context, connecting to Google only when searching is enabled or
/// `force` asks for it.
async fn connect(settings: Settings, force: bool) -> Result<AppContext> {
    let remote = if settings.stl_search || force {
        Some(google::connect(&settings).await?)
    } else {
        tracing::info!("ENABLE_STL_SEARCH is false, not connecting to Google");
        None
    };
    Ok(AppContext::new(settings, remote))
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Ez3dError::io(Path::new("<signal>"), e))
}

async fn join_scheduler(handle: tokio::task::JoinHandle<usize>) {
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "scheduler task failed");
    }
}

fn print_lookup(root: &Path, query: &str) {
    match library::lookup(root, query) {
        Lookup::Found { user, files } => {
            println!("{user}");
            let now = std::time::SystemTime::now();
            for file in files {
                println!("  {}  ({})", file.path.display(), file.age_label(now));
            }
        }
        Lookup::NotFound => println!("no user matches '{query}'"),
        Lookup::Ambiguous(users) => {
            println!("'{query}' matches {} users:", users.len());
            for user in users {
                println!("  {user}");
            }
        }
    }
}

fn report<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)
            .map_err(|e| Ez3dError::Config(format!("failed to serialize summary: {e}")))?;
        println!("{out}");
    } else {
        println!("{}", text());
    }
    Ok(())
}
