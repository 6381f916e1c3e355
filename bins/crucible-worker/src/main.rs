mod compiler;
mod engine;
mod error;
mod evaluator;
mod executor;
mod process;
mod resolver;
mod snapshot;
mod workspace;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod test_support;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crucible_common::config::{ComparisonMode, EngineConfig};
use crucible_common::toolchain::{ToolchainTable, DEFAULT_TOOLCHAINS_PATH};
use crucible_common::types::{Role, SuiteReport, TestType};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use executor::{CaseSource, SuiteExecutor};
use snapshot::SnapshotStore;
use workspace::Workspace;

const DEFAULT_CASE_COUNT: u32 = 10;

#[derive(Parser)]
#[command(name = "crucible-worker")]
#[command(about = "Resolve roles, compile once, and judge generated test suites", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Toolchain table overriding the built-in languages
    #[arg(long, global = true, default_value = DEFAULT_TOOLCHAINS_PATH)]
    toolchains: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test suite against a workspace or a stored snapshot
    Run(RunArgs),

    /// Create and inspect snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
}

#[derive(Args)]
struct RunArgs {
    /// Workspace directory holding the role sources
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Test type (comparison, validation, benchmark)
    #[arg(short, long, value_parser = TestType::from_str, required_unless_present = "from_snapshot")]
    test_type: Option<TestType>,

    /// Number of generated test cases
    #[arg(short = 'n', long, conflicts_with = "inputs")]
    count: Option<u32>,

    /// Directory of input files to use instead of the generator
    #[arg(long)]
    inputs: Option<PathBuf>,

    /// Maximum concurrent test cases
    #[arg(long)]
    workers: Option<usize>,

    /// Time limit for solution and reference stages
    #[arg(long)]
    time_limit_ms: Option<u64>,

    /// Output comparison (exact, trimmed, tokens)
    #[arg(long, value_parser = ComparisonMode::from_str)]
    compare: Option<ComparisonMode>,

    /// Snapshot store; when set, the run is recorded as a snapshot first
    #[arg(long, env = "CRUCIBLE_SNAPSHOT_STORE")]
    snapshot_store: Option<PathBuf>,

    /// Re-run a stored snapshot instead of the live workspace
    #[arg(long, requires = "snapshot_store")]
    from_snapshot: Option<Uuid>,

    /// Persist case inputs and solution outputs under this directory
    #[arg(long)]
    io_dir: Option<PathBuf>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Freeze the workspace's role binding
    Create {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        #[arg(short, long, value_parser = TestType::from_str)]
        test_type: TestType,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print a snapshot record, or the stored source of one role
    Show {
        id: Uuid,
        #[arg(long, value_parser = Role::from_str)]
        role: Option<Role>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// List stored snapshots, oldest first
    List {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Compare a snapshot with the live workspace
    Diff {
        id: Uuid,
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Snapshot store directory
    #[arg(long, env = "CRUCIBLE_SNAPSHOT_STORE", default_value = ".crucible/store")]
    store: PathBuf,
}

impl StoreArgs {
    fn open(&self) -> Result<SnapshotStore> {
        SnapshotStore::open(&self.store)
            .with_context(|| format!("failed to open snapshot store at {}", self.store.display()))
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let toolchains = ToolchainTable::load_with_overrides(&cli.toolchains)
        .with_context(|| format!("failed to load toolchains from {}", cli.toolchains.display()))?;
    info!(languages = ?toolchains.list_languages(), "Crucible worker booting...");

    match cli.command {
        Commands::Run(args) => run(args, toolchains).await,
        Commands::Snapshot(command) => snapshot_command(command, &toolchains),
    }
}

async fn run(args: RunArgs, toolchains: ToolchainTable) -> Result<()> {
    let mut config = EngineConfig::from_env();
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(limit) = args.time_limit_ms {
        config.time_limit_ms = limit;
    }
    if let Some(mode) = args.compare {
        config.comparison = mode;
    }
    if args.io_dir.is_some() {
        config.io_dir = args.io_dir.clone();
    }

    let source = match &args.inputs {
        Some(dir) => CaseSource::Supplied(read_inputs(dir)?),
        None => CaseSource::Generated(args.count.unwrap_or(DEFAULT_CASE_COUNT)),
    };

    // Ctrl-C cancels the suite; finished cases are still reported.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, cancelling suite");
            trigger.cancel();
        }
    });

    let executor = SuiteExecutor::new(config, Arc::new(toolchains.clone()));
    let store = args
        .snapshot_store
        .as_ref()
        .map(|dir| {
            SnapshotStore::open(dir)
                .with_context(|| format!("failed to open snapshot store at {}", dir.display()))
        })
        .transpose()?;

    let report = match (&store, args.from_snapshot) {
        (Some(store), Some(id)) => {
            let snapshot = store.load(id).with_context(|| format!("failed to load snapshot {}", id))?;
            let workspace = store.materialize(&snapshot)?;
            info!(snapshot_id = %snapshot.id, test_type = %snapshot.test_type, "Re-running snapshot");
            executor.run_snapshot(&snapshot, &workspace, source, &cancel).await?
        }
        (Some(store), None) => {
            let test_type = required_test_type(&args)?;
            let workspace = load_workspace(&args.workspace, &toolchains)?;
            let snapshot = store.create(&workspace, test_type)?;
            info!(snapshot_id = %snapshot.id, "Recorded snapshot for this run");
            executor.run_snapshot(&snapshot, &workspace, source, &cancel).await?
        }
        (None, _) => {
            let test_type = required_test_type(&args)?;
            let workspace = load_workspace(&args.workspace, &toolchains)?;
            executor.run_workspace(&workspace, test_type, source, &cancel).await?
        }
    };

    info!(compilations = executor.compiler().compile_count(), "Run complete");
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn required_test_type(args: &RunArgs) -> Result<TestType> {
    match args.test_type {
        Some(test_type) => Ok(test_type),
        None => bail!("--test-type is required unless --from-snapshot is given"),
    }
}

fn load_workspace(dir: &Path, toolchains: &ToolchainTable) -> Result<Workspace> {
    let workspace = Workspace::load_dir(dir, toolchains)
        .with_context(|| format!("failed to read workspace {}", dir.display()))?;
    if workspace.is_empty() {
        bail!("no source files found in {}", dir.display());
    }
    Ok(workspace)
}

/// Regular files in `dir`, ordered by the number in their name (`input_2` before `input_10`).
fn read_inputs(dir: &Path) -> Result<Vec<Vec<u8>>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read inputs from {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let number: Option<u64> = name
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok();
        (number, name)
    });

    if paths.is_empty() {
        bail!("no input files in {}", dir.display());
    }
    paths
        .iter()
        .map(|p| fs::read(p).with_context(|| format!("failed to read {}", p.display())))
        .collect()
}

fn print_report(report: &SuiteReport) {
    println!();
    for case in &report.results {
        let mark = if case.verdict.is_pass() { "✓" } else { "✗" };
        println!(
            "  {} Test {:>3}: {:<20} {:>6}ms  {}",
            mark, case.index, case.verdict.label(), case.solution_time_ms, case.detail
        );
    }
    println!();
    println!("Summary ({}):", report.test_type);
    println!("  Passed: {}", report.passed);
    println!("  Failed: {}", report.failed);
    for (verdict, count) in &report.verdict_counts {
        println!("    {:<20} {}", verdict.label(), count);
    }
    println!("  Slowest solution: {}ms", report.worst_time_ms);
    println!("  Total time: {}ms", report.total_time_ms);
    if report.cancelled {
        println!("  ⚠ Cancelled: only completed cases are shown");
    }
}

fn snapshot_command(command: SnapshotCommands, toolchains: &ToolchainTable) -> Result<()> {
    match command {
        SnapshotCommands::Create {
            workspace,
            test_type,
            store,
        } => {
            let store = store.open()?;
            let workspace = load_workspace(&workspace, toolchains)?;
            let snapshot = store.create(&workspace, test_type)?;
            println!("✅ Snapshot {} created", snapshot.id);
            for (role, file) in &snapshot.files {
                println!("   {:<10} {} ({})", role, file.path, file.content_hash.short());
            }
        }
        SnapshotCommands::Show { id, role, store } => {
            let store = store.open()?;
            let snapshot = store.load(id)?;
            match role {
                Some(role) => {
                    let source = store.read_file(&snapshot, role)?;
                    print!("{}", String::from_utf8_lossy(&source));
                }
                None => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            }
        }
        SnapshotCommands::List { store } => {
            let snapshots = store.open()?.list()?;
            if snapshots.is_empty() {
                println!("No snapshots stored.");
                return Ok(());
            }
            println!("{:<38} {:<12} {:<22} ROLES", "ID", "TYPE", "CREATED");
            println!("{}", "-".repeat(84));
            for snapshot in snapshots {
                let roles: Vec<&str> = snapshot.files.keys().map(|r| r.as_str()).collect();
                println!(
                    "{:<38} {:<12} {:<22} {}",
                    snapshot.id,
                    snapshot.test_type,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    roles.join(",")
                );
            }
        }
        SnapshotCommands::Diff { id, workspace, store } => {
            let store = store.open()?;
            let snapshot = store.load(id)?;
            let workspace = Workspace::load_dir(&workspace, toolchains)
                .with_context(|| format!("failed to read workspace {}", workspace.display()))?;
            let diff = store.diff(&snapshot, &workspace);
            if diff.is_empty() {
                println!("No changes since snapshot {}", snapshot.id);
                return Ok(());
            }
            for role in &diff.added {
                println!("  + {}", role);
            }
            for role in &diff.removed {
                println!("  - {}", role);
            }
            for role in &diff.modified {
                println!("  ~ {}", role);
            }
        }
    }
    Ok(())
}
