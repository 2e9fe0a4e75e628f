//! Diagkit Core - diagnostic artifact collection
//!
//! The main entry point for dk-core, handling:
//! - Supervised crash-dump analysis with resource ceilings
//! - Live stack capture from a running process
//! - Text thread-dump parsing
//! - Crash artifact inventory
//! - Capability, configuration and schema inspection

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dk_common::{format_error_human, OutputFormat, RecordKind, StructuredError, SCHEMA_VERSION};
use dk_core::capabilities::{detect_capabilities, resolve_site_scoping, EnvSiteScopeDetector};
use dk_core::collect::{
    CollectorConfig, LiveStackCollector, ProcfsTarget, Supervisor, SupervisorConfig,
};
use dk_core::config::{load_config, ConfigOptions, ResolvedConfig};
use dk_core::exit_codes::ExitCode;
use dk_core::inventory::{LocalDirectoryListing, ObjectListing, RemoteArtifactInventory, SiteFilter};
use dk_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LogConfig, LogContext, LogFormat,
    LogLevel, Stage,
};
use dk_core::parse::{is_supported_dump, parse_thread_dump_file};
use dk_core::report::{
    dump_identity, stage_analysis, stage_stacks, stage_thread_dump, write_unsupported_marker,
};
use tracing::{error, info, warn};

/// Diagkit Core - crash and hang evidence collection
#[derive(Parser)]
#[command(name = "dk-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Explicit config file
    #[arg(long, global = true, env = "DIAGKIT_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Override config directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Output format on stdout
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis tool against a crash artifact under resource ceilings
    Analyze(AnalyzeArgs),

    /// Capture live thread stacks from a running process
    Stacks(StacksArgs),

    /// Parse a text thread dump
    ParseDump(ParseDumpArgs),

    /// List stored crash artifacts
    Inventory(InventoryArgs),

    /// Report platform capabilities and site scoping
    Check,

    /// Configuration management
    Config(ConfigArgs),

    /// Print the JSON Schema of an output record
    Schema(SchemaArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Crash artifact passed to the analysis tool
    artifact: PathBuf,

    /// Directory receiving the raw output and redirect stub
    report_dir: PathBuf,
}

#[derive(Args, Debug)]
struct StacksArgs {
    /// Target process id
    pid: u32,

    /// Directory receiving stacks.json
    output_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ParseDumpArgs {
    /// Text thread dump named <machine>_<process>_....txt
    dump_path: PathBuf,

    /// Directory receiving the parsed report
    output_dir: PathBuf,
}

#[derive(Args, Debug)]
struct InventoryArgs {
    /// Storage root (overrides inventory.root)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Current site name (overrides inventory.site_name)
    #[arg(long)]
    site: Option<String>,

    /// Include each artifact's absolute locator
    #[arg(long)]
    include_locator: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the resolved configuration
    Show,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Record type
    record: RecordKind,
}

fn main() {
    let cli = Cli::parse();

    let level = LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet);
    init_logging(&LogConfig::from_env(level, cli.global.log_format));

    let ctx = LogContext::new(generate_run_id(), get_host_id());
    info!(
        event = event_names::RUN_STARTED,
        run_id = %ctx.run_id,
        version = env!("CARGO_PKG_VERSION"),
        "dk-core starting"
    );

    let exit_code = match &cli.command {
        Commands::Analyze(args) => run_analyze(&cli.global, &ctx, args),
        Commands::Stacks(args) => run_stacks(&cli.global, &ctx, args),
        Commands::ParseDump(args) => run_parse_dump(&cli.global, &ctx, args),
        Commands::Inventory(args) => run_inventory(&cli.global, &ctx, args),
        Commands::Check => run_check(&cli.global, &ctx),
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
        },
        Commands::Schema(args) => {
            print_json(&args.record.schema_json());
            ExitCode::Clean
        }
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    info!(
        event = event_names::RUN_FINISHED,
        run_id = %ctx.run_id,
        exit_code = exit_code.as_i32(),
        "dk-core finished"
    );
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_analyze(global: &GlobalOpts, ctx: &LogContext, args: &AnalyzeArgs) -> ExitCode {
    let _span = ctx.span(Stage::Analyze).entered();
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let supervisor_config = match SupervisorConfig::from_analysis(&resolved.config.analysis) {
        Ok(c) => c,
        Err(e) => return fail(global, &e.into()),
    };
    let result = match Supervisor::new(supervisor_config).run(&args.artifact) {
        Ok(r) => r,
        Err(e) => return fail(global, &e.into()),
    };

    let _report_span = ctx.span(Stage::Report).entered();
    let report_config = &resolved.config.report;
    let staged = match stage_analysis(&result, &args.artifact, &args.report_dir, report_config) {
        Ok(s) => s,
        Err(e) => return fail(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": ctx.run_id,
            "artifact": result.artifact,
            "elapsed_ms": result.elapsed_ms,
            "outcome": result.outcome,
            "samples": result.samples.len(),
            "peak_cpu_secs": result.peak_cpu_secs(),
            "peak_private_bytes": result.peak_private_bytes(),
            "payload_parsed": result.payload.is_some(),
            "report": staged,
        })),
        OutputFormat::Summary => {
            let ending = if result.outcome.was_killed() {
                "killed for resource breach"
            } else {
                "exited"
            };
            println!(
                "{}: {} after {} ms, report at {}",
                args.artifact.display(),
                ending,
                result.elapsed_ms,
                staged.data_path.display()
            )
        }
    }
    ExitCode::Clean
}

fn run_stacks(global: &GlobalOpts, ctx: &LogContext, args: &StacksArgs) -> ExitCode {
    let _span = ctx.span(Stage::Capture).entered();
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let target = ProcfsTarget::default();
    if !target.is_available() {
        warn!("procfs unavailable, capture will be empty");
    }
    let collector_config = CollectorConfig::from_stacks(&resolved.config.stacks);
    let collector = LiveStackCollector::new(target, collector_config);
    let records = collector.collect(args.pid);
    if records.is_empty() {
        warn!(pid = args.pid, "no threads captured");
    }

    let staged = match stage_stacks(&records, &args.output_dir) {
        Ok(s) => s,
        Err(e) => return fail(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": ctx.run_id,
            "pid": args.pid,
            "threads": records.len(),
            "output": staged.data_path,
        })),
        OutputFormat::Summary => println!(
            "Captured {} threads from process {} into {}",
            records.len(),
            args.pid,
            staged.data_path.display()
        ),
    }
    ExitCode::Clean
}

fn run_parse_dump(global: &GlobalOpts, ctx: &LogContext, args: &ParseDumpArgs) -> ExitCode {
    let _span = ctx.span(Stage::Parse).entered();
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    if !is_supported_dump(&args.dump_path) {
        return match write_unsupported_marker(&args.dump_path, &args.output_dir) {
            Ok(marker) => {
                warn!(dump = %args.dump_path.display(), "unsupported dump format, skipped");
                let message = format!("unsupported dump format, marker at {}", marker.display());
                emit_message(global, "skipped", &message);
                ExitCode::Clean
            }
            Err(e) => fail(global, &e.into()),
        };
    }

    if let Err(e) = dump_identity(&args.dump_path) {
        return fail(global, &e.into());
    }
    if !args.dump_path.is_file() {
        error!(dump = %args.dump_path.display(), "dump file not found");
        eprintln!("dk-core: dump file not found: {}", args.dump_path.display());
        return ExitCode::ArgsError;
    }

    let report = match parse_thread_dump_file(&args.dump_path) {
        Ok(r) => r,
        Err(e) => return fail(global, &e),
    };
    let report_config = &resolved.config.report;
    let staged = stage_thread_dump(&report, &args.dump_path, &args.output_dir, report_config);
    let staged = match staged {
        Ok(s) => s,
        Err(e) => return fail(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": ctx.run_id,
            "threads": report.threads.len(),
            "deadlock": report.has_deadlock(),
            "report": staged,
        })),
        OutputFormat::Summary => {
            let note = if report.has_deadlock() {
                " (deadlock reported)"
            } else {
                ""
            };
            println!(
                "Parsed {} threads{} into {}",
                report.threads.len(),
                note,
                staged.data_path.display()
            )
        }
    }
    ExitCode::Clean
}

fn run_inventory(global: &GlobalOpts, ctx: &LogContext, args: &InventoryArgs) -> ExitCode {
    let _span = ctx.span(Stage::Inventory).entered();
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let inventory_config = &resolved.config.inventory;

    let listing = args
        .root
        .clone()
        .or_else(|| inventory_config.root.clone())
        .map(|root| LocalDirectoryListing::new(root, inventory_config.page_size));
    let configured_site = inventory_config.site_name.as_deref();
    let site = args.site.as_deref().or(configured_site);
    let scoping = resolve_site_scoping(&EnvSiteScopeDetector::from_env());

    let inventory = RemoteArtifactInventory::new(listing.as_ref().map(|l| l as &dyn ObjectListing))
        .with_directory(inventory_config.directory.clone())
        .with_site_filter(SiteFilter::resolve(scoping, site))
        .with_locator(args.include_locator);

    let artifacts = match inventory.artifacts() {
        Ok(a) => a,
        Err(e) => return fail(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": ctx.run_id,
            "site_scoping": scoping,
            "count": artifacts.len(),
            "artifacts": artifacts,
        })),
        OutputFormat::Summary => {
            println!("{} artifacts", artifacts.len());
            for artifact in &artifacts {
                let created = artifact.created.to_rfc3339();
                println!("  {}  {}", created, artifact.relative_path);
            }
        }
    }
    ExitCode::Clean
}

fn run_check(global: &GlobalOpts, ctx: &LogContext) -> ExitCode {
    let _span = ctx.span(Stage::Init).entered();
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let caps = detect_capabilities(&resolved.config, &EnvSiteScopeDetector::from_env());
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "run_id": ctx.run_id,
            "capabilities": caps,
        })),
        OutputFormat::Summary => println!("{}", caps.summary()),
    }
    ExitCode::Clean
}

fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let resolved = match load(global) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let snapshot = resolved.snapshot();

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "source": {
                "path": snapshot.config_path.as_ref().map(|p| p.display().to_string()),
                "hash": snapshot.config_hash,
                "using_defaults": snapshot.config_path.is_none(),
                "env_overrides": snapshot.env_overrides,
            },
            "config": snapshot.config,
        })),
        OutputFormat::Summary => println!(
            "config: {}",
            snapshot
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in defaults".to_string())
        ),
    }
    ExitCode::Clean
}

// ============================================================================
// Helpers
// ============================================================================

fn load(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
        config_dir: global.config_dir.clone(),
    };
    load_config(&options).map_err(|e| fail(global, &e.into()))
}

/// Report `err` on stderr and map it to an exit code.
fn fail(global: &GlobalOpts, err: &dk_common::Error) -> ExitCode {
    error!(code = err.code(), category = %err.category(), error = %err, "command failed");
    match global.format {
        OutputFormat::Json => eprintln!("{}", StructuredError::from(err).to_json()),
        OutputFormat::Summary => {
            let color = std::io::stderr().is_terminal();
            eprintln!("{}", format_error_human(err, color))
        }
    }
    ExitCode::from(err)
}

fn emit_message(global: &GlobalOpts, status: &str, message: &str) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "status": status,
            "message": message,
        })),
        OutputFormat::Summary => println!("{message}"),
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "dk_core_version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
        })),
        OutputFormat::Summary => {
            println!("dk-core {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}
