//! archisync command-line tool.
//!
//! Reconciles an ArchiMate target model with a flat import feed, previews
//! the pending changes, or looks up the partition of an element type.

mod logging;
mod style;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use archisync_core::classifier::ElementClassifier;
use archisync_core::config::AppConfig;
use archisync_core::import_model::ImportSource;
use archisync_core::models::SyncStats;
use archisync_core::sync_controller::{PendingChanges, SyncController};
use archisync_core::target_model::TargetModel;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Reconcile an ArchiMate model with an element import feed.
#[derive(Parser, Debug)]
#[command(name = "archisync", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: ~/.config/archisync/config.toml, if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Minimum log level (overrides RUST_LOG and the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Number of diff workers.
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diff, apply and save in one pass.
    Sync {
        /// Target model file.
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Import feed file.
        #[arg(short, long)]
        import: Option<PathBuf>,

        /// Where to write the reconciled model (default: the target file).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the changes a sync would make, without writing anything.
    Diff {
        #[arg(short, long)]
        target: Option<PathBuf>,

        #[arg(short, long)]
        import: Option<PathBuf>,
    },

    /// Print the partition an element type belongs to.
    Classify {
        /// Element type, e.g. `Node` or `BusinessActor`.
        element_type: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(
        cli.log_level.as_deref(),
        &config.logging.level,
        config.logging.file.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Commands::Sync {
            target,
            import,
            output,
        } => {
            let paths = resolve_paths(&config, target, import, output)?;
            cmd_sync(&config, &paths, cli.json).await
        }
        Commands::Diff { target, import } => {
            let paths = resolve_paths(&config, target, import, None)?;
            cmd_diff(&config, &paths, cli.json).await
        }
        Commands::Classify { element_type } => cmd_classify(&element_type, cli.json),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("archisync").join("config.toml"))
}

/// Load and validate the config file, then apply command-line overrides.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));
    let mut config = match path {
        Some(path) => AppConfig::load_and_validate(&path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => AppConfig::default(),
    };

    if let Some(workers) = cli.workers {
        config.sync.worker_count = workers;
        config.validate().context("invalid --workers override")?;
    }
    Ok(config)
}

#[derive(Debug, PartialEq, Eq)]
struct DocumentPaths {
    target: PathBuf,
    import: PathBuf,
    output: PathBuf,
}

/// Command-line paths win over `[paths]`; output falls back to the target.
fn resolve_paths(
    config: &AppConfig,
    target: Option<PathBuf>,
    import: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<DocumentPaths> {
    let target = target
        .or_else(|| config.paths.target.clone())
        .context("no target model given (use --target or [paths] target)")?;
    let import = import
        .or_else(|| config.paths.import.clone())
        .context("no import feed given (use --import or [paths] import)")?;
    let output = output
        .or_else(|| config.paths.output.clone())
        .unwrap_or_else(|| target.clone());
    Ok(DocumentPaths {
        target,
        import,
        output,
    })
}

fn start_controller(config: &AppConfig, paths: &DocumentPaths) -> Result<SyncController> {
    let model = TargetModel::load(&paths.target)
        .with_context(|| format!("failed to load target model {}", paths.target.display()))?;
    let source = ImportSource::load(&paths.import)
        .with_context(|| format!("failed to load import feed {}", paths.import.display()))?;
    Ok(SyncController::start(model, source, config.sync.settings()))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Drive `work` to completion while showing live queue depths.
async fn with_progress<T>(
    controller: &SyncController,
    spinner: &ProgressBar,
    work: impl Future<Output = T>,
) -> T {
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            result = &mut work => return result,
            _ = ticker.tick() => {
                let counts = controller.pending_counts();
                spinner.set_message(format!(
                    "Diffing: {} queued, {} updates, {} adds ({} workers)",
                    counts.imports, counts.updates, counts.adds, counts.active_workers
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(config: &AppConfig, paths: &DocumentPaths, json: bool) -> Result<()> {
    let mut controller = start_controller(config, paths)?;

    let progress = spinner(json);
    let result = with_progress(&controller, &progress, controller.sync_changes()).await;
    progress.finish_and_clear();

    let outcome = result
        .context("sync pass failed")
        .and_then(|stats| {
            controller
                .save(&paths.output)
                .context("failed to save target model")?;
            Ok(stats)
        });
    controller.shutdown().await;
    let stats = outcome?;

    info!(output = %paths.output.display(), "sync finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    print_sync_summary(&stats, &paths.output);
    Ok(())
}

fn print_sync_summary(stats: &SyncStats, output: &Path) {
    println!();
    if stats.has_changes() {
        println!("{}", style::success("Sync complete"));
    } else {
        println!("{}", style::success("Target model already in sync"));
    }
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Change", "Count"]);
    for (label, count) in [
        ("Records updated", stats.updates.records_updated),
        ("Names changed", stats.updates.names_changed),
        ("Properties added", stats.updates.properties_added),
        ("Properties changed", stats.updates.properties_changed),
        ("Records added", stats.adds.records_added),
        ("Groups created", stats.adds.groups_created),
    ] {
        table.add_row(vec![Cell::new(label), Cell::new(count)]);
    }
    println!("{}", table);

    if stats.worker_faults > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{} diff worker(s) stopped after a fault; see the log",
                stats.worker_faults
            ))
        );
    }
    println!("  Saved to: {}", output.display());
    if let (Some(start), Some(end)) = (stats.started_at, stats.completed_at) {
        let elapsed = (end - start).num_milliseconds();
        println!("{}", style::dim(&format!("  Took {} ms", elapsed)));
    }
    println!();
}

/// One pending change, flattened for display.
#[derive(Debug, Serialize)]
struct ChangeRow {
    kind: &'static str,
    name: String,
    identity: String,
    group: String,
    target_id: Option<String>,
    reason: Option<String>,
}

fn change_rows(pending: &PendingChanges) -> Vec<ChangeRow> {
    let updates = pending.updates.iter().map(|u| ChangeRow {
        kind: "update",
        name: u.target_name.clone(),
        identity: u.import.identity_value.clone(),
        group: u.import.group.clone(),
        target_id: Some(u.target_id.clone()),
        reason: Some(u.reason.to_string()),
    });
    let adds = pending.adds.iter().map(|a| ChangeRow {
        kind: "add",
        name: a.import.name.clone(),
        identity: a.import.identity_value.clone(),
        group: a.import.group.clone(),
        target_id: None,
        reason: None,
    });
    updates.chain(adds).collect()
}

async fn cmd_diff(config: &AppConfig, paths: &DocumentPaths, json: bool) -> Result<()> {
    let mut controller = start_controller(config, paths)?;

    let progress = spinner(json);
    let drained = with_progress(&controller, &progress, controller.drain()).await;
    progress.finish_and_clear();

    let pending = controller.pending_changes();
    let faults = controller.worker_faults();
    controller.shutdown().await;
    drained.context("diff failed")?;

    let rows = change_rows(&pending);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!();
    if rows.is_empty() {
        println!("{}", style::success("No changes: target model is in sync"));
        println!();
        return Ok(());
    }

    println!(
        "{}",
        style::header(&format!(
            "Pending changes ({} updates, {} adds)",
            pending.updates.len(),
            pending.adds.len()
        ))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Kind", "Name", "Identity", "Group", "Reason"]);
    for row in &rows {
        let kind = match row.kind {
            "add" => style::add_label(),
            _ => style::update_label(),
        };
        table.add_row(vec![
            Cell::new(kind),
            Cell::new(&row.name),
            Cell::new(&row.identity),
            Cell::new(&row.group),
            Cell::new(row.reason.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{}", table);

    if faults > 0 {
        println!(
            "{}",
            style::warn(&format!("{} diff worker(s) stopped after a fault", faults))
        );
    }
    println!();
    Ok(())
}

#[derive(Debug, Serialize)]
struct Classification<'a> {
    element_type: &'a str,
    partition: &'a str,
}

fn cmd_classify(element_type: &str, json: bool) -> Result<()> {
    let partition = ElementClassifier::classify(element_type)?;
    if json {
        let out = Classification {
            element_type,
            partition: partition.folder_name(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", partition.folder_name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_command() {
        let cli = Cli::try_parse_from([
            "archisync",
            "--workers",
            "5",
            "sync",
            "--target",
            "model.archimate",
            "--import",
            "cmdb.xml",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(5));
        assert!(matches!(
            cli.command,
            Commands::Sync { ref target, output: None, .. }
                if target.as_deref() == Some(Path::new("model.archimate"))
        ));
    }

    #[test]
    fn test_resolve_paths_prefers_command_line() {
        let mut config = AppConfig::default();
        config.paths.target = Some("a.archimate".into());
        config.paths.import = Some("a.xml".into());

        let paths = resolve_paths(&config, Some("b.archimate".into()), None, None).unwrap();
        assert_eq!(
            paths,
            DocumentPaths {
                target: "b.archimate".into(),
                import: "a.xml".into(),
                output: "b.archimate".into(),
            }
        );
    }

    #[test]
    fn test_resolve_paths_requires_import() {
        let config = AppConfig::default();
        let err = resolve_paths(&config, Some("t".into()), None, None).unwrap_err();
        assert!(err.to_string().contains("--import"));
    }

    #[test]
    fn test_workers_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\nworker_count = 4\n").unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["archisync", "-c", &path_arg, "classify", "Node"]).unwrap();
        assert_eq!(load_config(&cli).unwrap().sync.worker_count, 4);

        let cli =
            Cli::try_parse_from(["archisync", "-c", &path_arg, "-w", "0", "classify", "Node"])
                .unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["archisync", "-c", &path_arg, "classify", "Node"]).unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("logging.level"), "{err:#}");
    }
}
