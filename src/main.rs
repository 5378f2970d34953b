// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Curator: Local PLR Content Scanner & Organizer
//!
//! Scans folders for Private Label Rights packages with a local AI model
//! and files them into a niche-keyed library.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use curator::catalog::{Catalog, CatalogEntry};
use curator::config::AppConfig;
use curator::history::ScanHistory;
use curator::ollama::OllamaClient;
use curator::options::{MaxDepth, ScanOptions, SpeedMode};
use curator::organize::OrganizeAction;
use curator::profiles::ProfileStore;
use curator::scan::{OrganizeTarget, ScanEvent, ScanOrchestrator, ScanReport};
use curator::session::ScanSession;
use curator::store::{JsonFileStore, KeyValueStore};
use curator::{CuratorError, Result};

/// Curator CLI - Local PLR Content Scanner & Organizer
#[derive(Parser, Debug)]
#[command(name = "curator")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Find, classify and organize PLR content with a local AI model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "curator.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides applied on top of the configured or profile options
#[derive(clap::Args, Debug, Default)]
struct OptionArgs {
    /// Maximum folder depth below each root ("unlimited" or a number)
    #[arg(long)]
    depth: Option<String>,

    /// Only scan files directly inside the selected folders
    #[arg(long)]
    no_subfolders: bool,

    /// Comma separated file types to include (e.g. pdf,zip)
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Quick mode: keep only results above 90% confidence
    #[arg(long)]
    quick: bool,
}

impl OptionArgs {
    fn apply(&self, mut options: ScanOptions) -> Result<ScanOptions> {
        if let Some(depth) = &self.depth {
            options.max_depth = depth.parse::<MaxDepth>()?;
        }
        if self.no_subfolders {
            options.include_subfolders = false;
        }
        if !self.types.is_empty() {
            options = options.with_file_types(&self.types);
        }
        if self.quick {
            options.speed_mode = SpeedMode::Quick;
        }
        Ok(options)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan folders for PLR content
    Scan {
        /// Folders to scan
        #[arg(required = true)]
        folders: Vec<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,

        /// Start from a saved scan profile
        #[arg(short, long)]
        profile: Option<String>,

        /// Organize detected PLR files after the scan
        #[arg(long)]
        organize: bool,

        /// Library folder to organize into (overrides config)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Move files instead of copying them
        #[arg(long = "move")]
        move_files: bool,
    },

    /// Scan profile management
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Scan history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Catalog of organized files
    Catalog {
        #[command(subcommand)]
        action: CatalogCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show AI engine status
    Status,

    /// Initialize a new Curator library
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    /// List saved profiles
    List,

    /// Save the configured options, with overrides, as a profile
    Save {
        /// Profile name
        name: String,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Show one profile
    Show {
        id: String,
    },

    /// Delete a profile
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent scans
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogCommands {
    /// Show catalog statistics
    Stats,

    /// Search organized files by path, niche or tag
    Search {
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List organized files in a niche
    Niche {
        niche: String,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "curator.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Some(Commands::Scan { folders, options, profile, organize, dest, move_files }) => {
            let request = ScanRequest { folders, options, profile, organize, dest, move_files };
            run_scan(config, request, json, cli.quiet).await
        }
        Some(Commands::Profile { action }) => run_profile_command(config, action, json),
        Some(Commands::History { action }) => run_history_command(config, action, json),
        Some(Commands::Catalog { action }) => run_catalog_command(config, action, json),
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => {
            let _ = Cli::command().print_help();
            Ok(())
        }
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(JsonFileStore::open(&config.storage.store_path)?))
}

/// Relative paths are taken from the working directory
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

struct ScanRequest {
    folders: Vec<PathBuf>,
    options: OptionArgs,
    profile: Option<String>,
    organize: bool,
    dest: Option<PathBuf>,
    move_files: bool,
}

/// Run a scan with Ctrl+C cancellation and live progress
async fn run_scan(config: AppConfig, request: ScanRequest, json: bool, quiet: bool) -> Result<()> {
    let store = open_store(&config)?;
    let profiles = ProfileStore::new(store.clone());

    let base_options = match &request.profile {
        Some(id) => profiles.load_profile(id)?,
        None => config.scan.defaults.clone(),
    };
    let options = request.options.apply(base_options)?;

    // Reject a missing destination before anything is walked
    let target = if request.organize {
        let base = request
            .dest
            .or_else(|| config.organize.base_folder.clone())
            .ok_or_else(|| CuratorError::Config("--organize needs --dest or organize.base_folder".to_string()))?;
        let action = if request.move_files { OrganizeAction::Move } else { config.organize.action };
        Some(OrganizeTarget { base_folder: absolute(&base)?, action })
    } else {
        None
    };

    let folders = request
        .folders
        .iter()
        .map(|f| absolute(f))
        .collect::<Result<Vec<_>>>()?;

    let history = Arc::new(ScanHistory::new(store));
    let catalog = Catalog::open(&config.storage.catalog_path)?;
    let orchestrator = Arc::new(ScanOrchestrator::from_config(&config, history, Some(catalog))?);
    let target = target.or_else(|| orchestrator.auto_organize().cloned());

    let session = ScanSession::with_folders(&folders, options);
    for root in session.tree().roots.iter() {
        session.toggle_selection(&root.id)?;
    }

    // Ctrl+C cancels the running scan; the history still records it
    let cancel_handle = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling scan...");
            if let Err(e) = cancel_handle.cancel_scan() {
                warn!("{}", e);
            }
        }
    });

    let progress = if json || quiet {
        None
    } else {
        let mut events = orchestrator.subscribe();
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ScanEvent::Finished { .. }) | Err(RecvError::Closed) => break,
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        }))
    };

    let outcome = session.scan(&orchestrator, target).await;
    ctrl_c.abort();
    if let Some(progress) = progress {
        let _ = tokio::time::timeout(Duration::from_secs(1), progress).await;
    }

    let report = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_event(event: &ScanEvent) {
    match event {
        ScanEvent::RootWalked { root, files } => println!("Found {} files in {}", files, root.display()),
        ScanEvent::WalkFailed { root, reason } => println!("Cannot scan {}: {}", root.display(), reason),
        ScanEvent::Progress { processed, total } if *total > 0 => {
            println!("Classified {}/{} ({:.0}%)", processed, total, *processed as f64 / *total as f64 * 100.0)
        }
        ScanEvent::BatchFailed { index, batches, reason } => {
            println!("Batch {}/{} failed: {}", index + 1, batches, reason)
        }
        ScanEvent::Organizing { files } => println!("Organizing {} PLR files...", files),
        ScanEvent::FileOrganized { result, .. } if result.success => {
            println!("  {} -> {}", result.source_path.display(), result.destination_path.display())
        }
        _ => {}
    }
}

fn print_report(report: &ScanReport) {
    println!("\nScan {}: {} files, {} PLR", report.status, report.files_found, report.history.plr_files_detected);
    if report.skipped_known > 0 {
        println!("  {} already organized files skipped", report.skipped_known);
    }
    if report.files_found == 0 {
        println!("  No files found");
    }
    for failure in &report.batch_failures {
        println!("  Batch {} ({} files) failed: {}", failure.index + 1, failure.files, failure.reason);
    }

    for result in report.plr_results() {
        let niche = match (&result.niche, &result.sub_niche) {
            (Some(n), Some(s)) => format!("{} / {}", n, s),
            (Some(n), None) => n.clone(),
            _ => "Uncategorized".to_string(),
        };
        println!(
            "  {} [{}] {} ({:.0}%, quality {})",
            result.file_path.display(),
            result.license_type,
            niche,
            result.confidence * 100.0,
            result.quality_rating
        );
    }

    if let Some(organize) = &report.organize {
        println!("\nOrganized {} of {} files", organize.succeeded(), organize.results.len());
        for failure in organize.failures() {
            println!(
                "  Failed: {} ({})",
                failure.source_path.display(),
                failure.error_reason.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if !report.history_saved {
        println!("\nWarning: scan history could not be saved");
    }
}

/// Run profile commands
fn run_profile_command(config: AppConfig, action: ProfileCommands, json: bool) -> Result<()> {
    let profiles = ProfileStore::new(open_store(&config)?);

    match action {
        ProfileCommands::List => {
            let list = profiles.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            println!("Scan profiles ({}):", list.len());
            for p in list {
                println!(
                    "  {}  {}  depth={} subfolders={} mode={:?} types={}",
                    p.id,
                    p.name,
                    p.options.max_depth,
                    p.options.include_subfolders,
                    p.options.speed_mode,
                    p.options.file_type_filter.iter().cloned().collect::<Vec<_>>().join(",")
                );
            }
        }
        ProfileCommands::Save { name, options } => {
            let options = options.apply(config.scan.defaults.clone())?;
            let profile = profiles.save_profile(&name, &options)?;
            println!("Saved profile '{}' ({})", profile.name, profile.id);
        }
        ProfileCommands::Show { id } => match profiles.get(&id)? {
            Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
            None => return Err(CuratorError::Config(format!("No profile with id {}", id))),
        },
        ProfileCommands::Delete { id } => {
            if profiles.delete_profile(&id)? {
                println!("Deleted profile {}", id);
            } else {
                println!("No profile with id {}", id);
            }
        }
    }

    Ok(())
}

/// Run history commands
fn run_history_command(config: AppConfig, action: HistoryCommands, json: bool) -> Result<()> {
    let history = ScanHistory::new(open_store(&config)?);

    match action {
        HistoryCommands::List { count } => {
            let records = history.get_recent(count)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            println!("Recent scans ({} entries):", records.len());
            for r in records {
                println!(
                    "  {} {:<9} {} files, {} PLR, {} organized, {}ms  {:?}",
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.status.to_string(),
                    r.files_found,
                    r.plr_files_detected,
                    r.files_organized,
                    r.scan_duration_ms,
                    r.folders_scanned
                );
            }
        }
    }

    Ok(())
}

fn print_entries(entries: &[CatalogEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for e in entries {
        println!(
            "  {} <- {} [{}] {}",
            e.destination_path.display(),
            e.source_path.display(),
            e.niche.as_deref().unwrap_or("Uncategorized"),
            e.organized_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

/// Run catalog commands
fn run_catalog_command(config: AppConfig, action: CatalogCommands, json: bool) -> Result<()> {
    let catalog = Catalog::open(&config.storage.catalog_path)?;

    match action {
        CatalogCommands::Stats => {
            let stats = catalog.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Catalog Statistics:");
            println!("  Files: {}", stats.file_count);
            println!("  Niches: {}", stats.niche_count);
            for (niche, count) in stats.niches {
                println!("    {} ({})", niche, count);
            }
        }
        CatalogCommands::Search { query, limit } => {
            let entries = catalog.search(&query, limit)?;
            if !json {
                println!("Search results for '{}':", query);
            }
            print_entries(&entries, json)?;
        }
        CatalogCommands::Niche { niche, limit } => {
            let entries = catalog.by_niche(&niche, limit)?;
            if !json {
                println!("Files in '{}':", niche);
            }
            print_entries(&entries, json)?;
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Model: {}", config.classifier.model);
            println!("  Batch size: {}", config.scan.batch_size);
            println!(
                "  Library: {}",
                config
                    .organize
                    .base_folder
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  Catalog: {}", config.storage.catalog_path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(&config.classifier.url, Duration::from_secs(10))?;

    println!("Curator v1.0.0 Status");
    println!("=====================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: Running"),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m.starts_with(config.classifier.model.as_str()) { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    match Catalog::open(&config.storage.catalog_path) {
        Ok(catalog) => {
            let stats = catalog.stats()?;
            println!("\nCatalog ({}):", config.storage.catalog_path);
            println!("  Files: {}", stats.file_count);
            println!("  Niches: {}", stats.niche_count);
        }
        Err(e) => println!("\nCatalog: Error - {}", e),
    }

    match open_store(&config).map(ScanHistory::new) {
        Ok(history) => println!("\nScans recorded: {}", history.len()?),
        Err(e) => println!("\nHistory: Error - {}", e),
    }

    println!("\nConfiguration:");
    println!("  Model: {}", config.classifier.model);
    println!("  Batch size: {}", config.scan.batch_size);
    println!("  Auto-organize: {}", config.organize.auto_organize);

    Ok(())
}

/// Initialize a new Curator library
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = absolute(&dir.unwrap_or_else(|| PathBuf::from(".")))?;
    let config_path = target.join("curator.json");

    if config_path.exists() && !force {
        return Err(CuratorError::Config(
            "curator.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let library = target.join("library");
    std::fs::create_dir_all(&library)?;

    let mut config = AppConfig::default();
    config.organize.base_folder = Some(library);
    config.storage.store_path = target.join("curator_store.json").to_string_lossy().into_owned();
    config.storage.catalog_path = target.join("curator_catalog.db").to_string_lossy().into_owned();
    config.save(&config_path)?;

    println!("Curator initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - curator.json");
    println!("  - library/");
    println!("\nNext steps:");
    println!("  1. Start Ollama and pull {}", config.classifier.model);
    println!("  2. Scan: curator scan ~/Downloads --organize");

    Ok(())
}
