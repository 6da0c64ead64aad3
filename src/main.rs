//! filesage - resumable filesystem inventory and duplicate consolidation.
//!
//! Usage:
//!   filesage scan [ROOT] [-H]        Record a tree into the database
//!   filesage scan --resume ID        Continue an interrupted run
//!   filesage runs [--unfinished]     List scan runs
//!   filesage log [ID]                Show the event log of one or all runs
//!   filesage skip-resume ID          Never auto-resume a run
//!   filesage duplicates              List duplicate groups of a hashed run
//!   filesage hardlink [--dry-run]    Replace duplicates with hardlinks
//!   filesage compare A B             List content of run A missing from run B
//!
//! The same binary is installed as `fscan`.

mod config;
mod logging;
mod signal;

use std::path::{Path, PathBuf};
use std::thread;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use filesage_analyze::{
    DuplicateConfig, DuplicateGrouper, DuplicateReport, HardlinkPlanner, RunComparison,
    compare_runs, dry_run,
};
use filesage_core::{HardlinkPlan, RunId, RunMetadata, RunOptions, RunSelector, ScanRun};
use filesage_ops::{ExecuteOptions, ExecutionSummary, HardlinkResult, start_hardlink};
use filesage_scan::{ControllerSettings, RunController, RunOutcome, RunSummary};
use filesage_store::{LogSelector, Store};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "filesage",
    version,
    about = "Resumable filesystem inventory with duplicate detection",
    long_about = "filesage records directory trees into a SQLite database, \
                  resumes interrupted scans, and finds byte-identical files \
                  that can be replaced with hardlinks."
)]
struct Cli {
    /// Database file (defaults to the configured path or ~/.filesage/filesage.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only errors, no progress
    #[arg(short, long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory tree into the database
    Scan {
        /// Root directory to scan
        #[arg(required_unless_present = "resume", conflicts_with = "resume")]
        root: Option<PathBuf>,

        /// Hash file contents (needed for duplicate detection)
        #[arg(short = 'H', long)]
        hash: bool,

        /// Name for the run
        #[arg(long)]
        name: Option<String>,

        /// Comment stored with the run
        #[arg(long)]
        comment: Option<String>,

        /// Start fresh even if an unfinished run of this root exists
        #[arg(long)]
        skip_resume: bool,

        /// Resume the given run instead of starting a new one
        #[arg(long, value_name = "ID")]
        resume: Option<RunId>,
    },

    /// List scan runs
    Runs {
        /// Only runs that can be resumed
        #[arg(long)]
        unfinished: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the event log of one run, or of all runs
    Log {
        /// Run id
        id: Option<RunId>,
    },

    /// Mark a run so it is never resumed
    SkipResume {
        /// Run id
        id: RunId,
    },

    /// List duplicate files of a hashed run
    Duplicates {
        /// Run id (defaults to the newest completed hashed run)
        #[arg(long)]
        run: Option<RunId>,

        /// Minimum file size to consider (e.g., "1KB", "1MB")
        #[arg(long)]
        min_size: Option<String>,

        /// Maximum number of duplicate groups to show (0 = all)
        #[arg(short = 'n', long, default_value = "0")]
        top: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Replace duplicate files with hardlinks to one copy
    Hardlink {
        /// Run id (defaults to the newest completed hashed run)
        #[arg(long)]
        run: Option<RunId>,

        /// Minimum file size to link (default 4097 bytes)
        #[arg(long)]
        min_size: Option<String>,

        /// Only report what would be done
        #[arg(long)]
        dry_run: bool,

        /// Re-hash every file before linking it
        #[arg(long, conflicts_with = "dry_run")]
        strict: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List files of one hashed run whose content is absent from another
    Compare {
        /// Run whose content must be present
        source: RunId,

        /// Run searched for that content
        target: RunId,

        /// Database holding the target run (defaults to the main database)
        #[arg(long, value_name = "PATH")]
        target_database: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.silent);

    let config = Config::load()?;
    let db_path = config.database_path(cli.database);
    let mut store = Store::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!(database = %db_path.display(), "Opened database");

    match cli.command {
        Command::Scan {
            root,
            hash,
            name,
            comment,
            skip_resume,
            resume,
        } => {
            let args = ScanArgs {
                root,
                hash,
                name,
                comment,
                skip_resume,
                resume,
            };
            run_scan(&mut store, &config, args, cli.silent)?;
        }
        Command::Runs { unfinished, format } => {
            run_list(&store, unfinished, format)?;
        }
        Command::Log { id } => {
            let selector = id.map_or(LogSelector::All, LogSelector::Run);
            for line in store.print_log(selector)? {
                println!("{}", line?);
            }
        }
        Command::SkipResume { id } => {
            store.mark_skip_resume(id)?;
            println!("Run {} will not be resumed", id);
        }
        Command::Duplicates {
            run,
            min_size,
            top,
            format,
        } => {
            let min_bytes = match min_size {
                Some(s) => parse_size(&s)?,
                None => config.min_size,
            };
            run_duplicates(&store, run.into(), min_bytes, top, format)?;
        }
        Command::Hardlink {
            run,
            min_size,
            dry_run,
            strict,
            format,
        } => {
            let min_bytes = match min_size {
                Some(s) => parse_size(&s)?,
                None => config.hardlink_min_size,
            };
            run_hardlink(&store, run.into(), min_bytes, dry_run, strict, format)?;
        }
        Command::Compare {
            source,
            target,
            target_database,
            format,
        } => {
            run_compare(&store, source, target, target_database.as_deref(), format)?;
        }
    }

    Ok(())
}

struct ScanArgs {
    root: Option<PathBuf>,
    hash: bool,
    name: Option<String>,
    comment: Option<String>,
    skip_resume: bool,
    resume: Option<RunId>,
}

/// Run or resume a scan, with progress on stderr.
fn run_scan(store: &mut Store, config: &Config, args: ScanArgs, silent: bool) -> Result<()> {
    let settings = ControllerSettings::builder()
        .batch_size(config.batch_size)
        .skip_resume(args.skip_resume)
        .build()?;
    let cancel = signal::install()?;

    let controller = RunController::new(store, settings).with_cancel_flag(cancel);
    let mut progress_rx = controller.subscribe();
    let mut controller = controller;

    let reporter = thread::spawn(move || {
        loop {
            match progress_rx.blocking_recv() {
                Ok(progress) if !silent => {
                    eprint!(
                        "\r  {} files, {} dirs, {} ({:.0} files/s)   ",
                        progress.files_scanned,
                        progress.dirs_scanned,
                        format_size(progress.bytes_scanned),
                        progress.files_per_second()
                    );
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = match args.resume {
        Some(id) => {
            if !silent {
                eprintln!("Resuming run {}...", id);
            }
            controller.resume(id)
        }
        None => {
            let root = args.root.ok_or_else(|| eyre!("A root directory is required"))?;
            let mut builder = RunOptions::builder();
            builder
                .hashing_enabled(args.hash)
                .ignore_patterns(config.ignore_patterns.clone())
                .name(args.name)
                .comment(args.comment);
            if let Some(skip_paths) = &config.skip_paths {
                builder.skip_paths(skip_paths.clone());
            }
            let options = builder.build()?;

            if !silent {
                eprintln!("Scanning {}...", root.display());
            }
            controller.start(&root, options, RunMetadata::capture())
        }
    };

    drop(controller);
    let _ = reporter.join();
    if !silent {
        eprintln!();
    }

    let summary = result.context("Scan failed")?;
    print_scan_summary(&summary);
    if summary.ignored_options {
        eprintln!(
            "Note: run {} was resumed with its original options; the requested \
             hashing, name and comment were ignored. Use --skip-resume to start a new run.",
            summary.run_id
        );
    }

    if summary.outcome == RunOutcome::Interrupted {
        eprintln!("Interrupted. Resume with: filesage scan --resume {}", summary.run_id);
        std::process::exit(signal::EXIT_CODE_INTERRUPTED);
    }
    Ok(())
}

fn print_scan_summary(summary: &RunSummary) {
    println!();
    println!("{}", "─".repeat(60));
    println!(
        " Run {}{}",
        summary.run_id,
        if summary.resumed { " (resumed)" } else { "" }
    );
    println!(
        " {} files recorded, {} ({} unique)",
        summary.files_recorded,
        format_size(summary.bytes_recorded),
        format_size(summary.unique_bytes)
    );
    println!(" {} files hashed", summary.files_hashed);
    println!(" Finished in {:.2}s", summary.elapsed.as_secs_f64());
    println!("{}", "─".repeat(60));

    if !summary.warnings.is_empty() {
        println!();
        println!("{} warning(s) during scan", summary.warnings.len());
        for warning in summary.warnings.iter().take(10) {
            println!("  {}: {}", warning.path.display(), warning.message);
        }
        if summary.warnings.len() > 10 {
            println!(
                "  ... and {} more (see `filesage log {}`)",
                summary.warnings.len() - 10,
                summary.run_id
            );
        }
    }
}

/// List runs.
fn run_list(store: &Store, unfinished: bool, format: OutputFormat) -> Result<()> {
    let runs = if unfinished {
        store.incomplete_runs(None)?
    } else {
        store.list_runs()?
    };

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs.");
            }
            for run in &runs {
                print_run(run);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
    }
    Ok(())
}

fn print_run(run: &ScanRun) {
    let finished = run
        .finished_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>5}  {:<10} {}  {:<19}  {}{}{}",
        run.id,
        run.status.as_str(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        finished,
        run.display_name(),
        if run.options.hashing_enabled { "" } else { " [no hash]" },
        if run.skip_resume { " [skip-resume]" } else { "" },
    );
}

/// Find duplicates in a stored run.
fn run_duplicates(
    store: &Store,
    selector: RunSelector,
    min_size: u64,
    top: usize,
    format: OutputFormat,
) -> Result<()> {
    let config = DuplicateConfig::builder()
        .min_size(min_size)
        .max_groups(top)
        .build()?;
    let report = DuplicateGrouper::with_config(store, config).find_duplicates(selector)?;

    match format {
        OutputFormat::Text => print_duplicates(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_duplicates(report: &DuplicateReport) {
    println!();
    println!("{}", "─".repeat(70));
    println!(" Duplicate File Report (run {})", report.run_id);
    println!("{}", "─".repeat(70));
    println!();

    if !report.has_duplicates() {
        println!(" No duplicate files found.");
        return;
    }

    println!(
        " Found {} duplicate groups ({} files)",
        report.group_count, report.files_with_duplicates
    );
    println!(" Total wasted space: {}", format_size(report.total_wasted_space));
    if report.already_linked_groups > 0 {
        println!(" {} groups already hardlinked", report.already_linked_groups);
    }
    println!();

    for (i, group) in report.groups.iter().enumerate() {
        println!(
            " Group {} ({} files, {} each, {} wasted)",
            i + 1,
            group.count(),
            format_size(group.size),
            format_size(group.wasted_bytes())
        );
        for member in &group.members {
            println!("   {}", member.path.display());
        }
        println!();
    }
}

/// Plan hardlinks and either report or apply them.
fn run_hardlink(
    store: &Store,
    selector: RunSelector,
    min_size: u64,
    dry: bool,
    strict: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = DuplicateConfig::builder().min_size(min_size).build()?;
    let report = DuplicateGrouper::with_config(store, config).find_duplicates(selector)?;
    let planner = HardlinkPlanner::new(min_size);
    let plan = planner.plan(report.run_id, &report.groups);

    if dry {
        let preview = dry_run(&plan);
        match format {
            OutputFormat::Text => {
                println!(
                    "Run {}, files of at least {}",
                    plan.run_id,
                    format_size(planner.min_size())
                );
                for line in preview.lines() {
                    println!("{}", line);
                }
                println!(
                    "{} files would be replaced, {} reclaimable",
                    preview.files_to_replace,
                    format_size(preview.bytes_reclaimable)
                );
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&preview)?),
        }
        return Ok(());
    }

    if plan.is_empty() {
        println!("Nothing to hardlink.");
        return Ok(());
    }

    let run_id = plan.run_id;
    let summary = execute_plan(plan, ExecuteOptions { strict })?;

    store.append_log(run_id, &summary.summary())?;
    for failure in &summary.failures {
        store.append_log(run_id, &format!("Hardlink skipped: {}", failure))?;
    }

    println!("{}", summary.summary());
    println!("Reclaimed {}", format_size(summary.bytes_reclaimed));
    for failure in &summary.failures {
        eprintln!("  {}", failure);
    }
    Ok(())
}

fn execute_plan(plan: HardlinkPlan, options: ExecuteOptions) -> Result<ExecutionSummary> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(async move {
        let mut rx = start_hardlink(plan, options);
        while let Some(result) = rx.recv().await {
            match result {
                HardlinkResult::Progress(progress) => {
                    let errors = if progress.has_errors() {
                        format!(", {} errors", progress.error_count)
                    } else {
                        String::new()
                    };
                    eprint!(
                        "\r  {:.0}% ({} files linked{})   ",
                        progress.percentage(),
                        progress.files_linked,
                        errors
                    );
                }
                HardlinkResult::Complete(summary) => {
                    eprintln!();
                    return Ok(summary);
                }
            }
        }
        Err(eyre!("Hardlink task ended without a summary"))
    })
}

/// Report source-run content that the target run lacks.
fn run_compare(
    store: &Store,
    source: RunId,
    target: RunId,
    target_database: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let other;
    let target_store = match target_database {
        Some(path) => {
            if !path.is_file() {
                return Err(eyre!("Target database {} does not exist", path.display()));
            }
            other = Store::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            &other
        }
        None => store,
    };

    let comparison = compare_runs(
        store,
        RunSelector::Id(source),
        target_store,
        RunSelector::Id(target),
    )?;
    match format {
        OutputFormat::Text => print_comparison(&comparison),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&comparison)?),
    }
    Ok(())
}

fn print_comparison(comparison: &RunComparison) {
    println!(
        " Run {} ({} files) against run {} ({} files)",
        comparison.source_run,
        comparison.source_files,
        comparison.target_run,
        comparison.target_files
    );
    if comparison.is_covered() {
        println!(" Every file has a copy in run {}.", comparison.target_run);
        return;
    }

    println!(
        " {} files ({}) have no copy in run {}",
        comparison.missing.len(),
        format_size(comparison.missing_bytes),
        comparison.target_run
    );
    println!();
    for (dir, files) in comparison.missing_by_directory() {
        println!(" {}", dir.display());
        for file in files {
            let name = file.path.file_name().unwrap_or(file.path.as_os_str());
            println!("   {} ({})", Path::new(name).display(), format_size(file.size));
        }
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Parse a size string (e.g., "4097", "1KB", "10MB", "1GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let multiplier: u64 = match &s[digits.len()..] {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        unit => return Err(eyre!("Unknown size unit {:?}", unit)),
    };
    let num: f64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Invalid size {:?}", s))?;
    Ok((num * multiplier as f64) as u64)
}
